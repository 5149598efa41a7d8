//! CHAP verification for RADIUS (RFC 2865 Section 5.3).
//!
//! The CHAP-Password attribute carries one identifier byte followed by the
//! 16-byte MD5 response; the challenge is either the CHAP-Challenge
//! attribute or, absent that, the Request Authenticator.

use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChapError {
    #[error("invalid CHAP-Password length: expected 17 bytes, got {0}")]
    InvalidLength(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapResponse {
    pub ident: u8,
    pub response: [u8; 16],
}

impl ChapResponse {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChapError> {
        if bytes.len() != 17 {
            return Err(ChapError::InvalidLength(bytes.len()));
        }
        let mut response = [0u8; 16];
        response.copy_from_slice(&bytes[1..]);
        Ok(ChapResponse {
            ident: bytes[0],
            response,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(17);
        bytes.push(self.ident);
        bytes.extend_from_slice(&self.response);
        bytes
    }
}

/// MD5(Identifier ∥ Password ∥ Challenge)
pub fn compute_chap_response(ident: u8, password: &str, challenge: &[u8]) -> [u8; 16] {
    let mut data = Vec::with_capacity(1 + password.len() + challenge.len());
    data.push(ident);
    data.extend_from_slice(password.as_bytes());
    data.extend_from_slice(challenge);
    md5::compute(&data).0
}

/// Constant-time verification of a CHAP response.
pub fn verify_chap_response(response: &ChapResponse, password: &str, challenge: &[u8]) -> bool {
    let expected = compute_chap_response(response.ident, password, challenge);
    expected.ct_eq(&response.response).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_enforces_length() {
        assert!(ChapResponse::from_bytes(&[0u8; 16]).is_err());
        assert!(ChapResponse::from_bytes(&[0u8; 18]).is_err());
        let parsed = ChapResponse::from_bytes(&[7u8; 17]).unwrap();
        assert_eq!(parsed.ident, 7);
        assert_eq!(parsed.response, [7u8; 16]);
    }

    #[test]
    fn roundtrip_bytes() {
        let original = ChapResponse {
            ident: 0x42,
            response: [0xAB; 16],
        };
        assert_eq!(
            ChapResponse::from_bytes(&original.to_bytes()).unwrap(),
            original
        );
    }

    #[test]
    fn verify_accepts_correct_password() {
        let challenge = b"0123456789abcdef";
        let response = ChapResponse {
            ident: 1,
            response: compute_chap_response(1, "secret123", challenge),
        };
        assert!(verify_chap_response(&response, "secret123", challenge));
        assert!(!verify_chap_response(&response, "wrong", challenge));
        assert!(!verify_chap_response(&response, "secret123", b"fedcba9876543210"));
    }

    #[test]
    fn response_depends_on_ident() {
        let challenge = b"0123456789abcdef";
        assert_ne!(
            compute_chap_response(1, "pw", challenge),
            compute_chap_response(2, "pw", challenge)
        );
    }
}
