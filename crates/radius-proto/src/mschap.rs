//! MS-CHAP-v2 verification (RFC 2759) for RADIUS (RFC 2548).
//!
//! Carried in the Microsoft vendor space: MS-CHAP-Challenge holds the
//! 16-byte authenticator challenge, MS-CHAP2-Response the peer challenge and
//! the 24-byte NT-Response. A successful verification is answered with the
//! MS-CHAP2-Success attribute: the response identifier followed by
//! `S=<40 uppercase hex digits>` of the authenticator response.

use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::Des;
use md4::Md4;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MsChapError {
    #[error("invalid MS-CHAP2-Response length: expected 50 bytes, got {0}")]
    InvalidResponseLength(usize),
    #[error("invalid MS-CHAP-Challenge length: expected 16 bytes, got {0}")]
    InvalidChallengeLength(usize),
}

const MAGIC1: &[u8; 39] = b"Magic server to client signing constant";
const MAGIC2: &[u8; 41] = b"Pad to make it do more than one iteration";

/// MS-CHAP2-Response vendor sub-attribute value (RFC 2548 Section 2.3.2):
/// Ident, Flags, Peer-Challenge (16), Reserved (8), NT-Response (24).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsChap2Response {
    pub ident: u8,
    pub flags: u8,
    pub peer_challenge: [u8; 16],
    pub nt_response: [u8; 24],
}

impl MsChap2Response {
    pub const LENGTH: usize = 50;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MsChapError> {
        if bytes.len() != Self::LENGTH {
            return Err(MsChapError::InvalidResponseLength(bytes.len()));
        }
        let mut peer_challenge = [0u8; 16];
        peer_challenge.copy_from_slice(&bytes[2..18]);
        let mut nt_response = [0u8; 24];
        nt_response.copy_from_slice(&bytes[26..50]);
        Ok(MsChap2Response {
            ident: bytes[0],
            flags: bytes[1],
            peer_challenge,
            nt_response,
        })
    }
}

/// MD4 over the UTF-16LE encoding of the password (RFC 2759 NtPasswordHash).
pub fn nt_password_hash(password: &str) -> [u8; 16] {
    let mut utf16 = Vec::with_capacity(password.len() * 2);
    for unit in password.encode_utf16() {
        utf16.extend_from_slice(&unit.to_le_bytes());
    }
    let mut hasher = Md4::new();
    hasher.update(&utf16);
    hasher.finalize().into()
}

/// First 8 bytes of SHA1(PeerChallenge ∥ AuthenticatorChallenge ∥ UserName)
/// (RFC 2759 ChallengeHash). The user name excludes any domain prefix.
pub fn challenge_hash(
    peer_challenge: &[u8; 16],
    authenticator_challenge: &[u8; 16],
    user_name: &str,
) -> [u8; 8] {
    let mut hasher = Sha1::new();
    hasher.update(peer_challenge);
    hasher.update(authenticator_challenge);
    hasher.update(user_name.as_bytes());
    let digest = hasher.finalize();
    let mut hash = [0u8; 8];
    hash.copy_from_slice(&digest[..8]);
    hash
}

/// DES-encrypt the 8-byte challenge with three keys cut from the zero-padded
/// password hash (RFC 2759 ChallengeResponse).
pub fn challenge_response(challenge: &[u8; 8], password_hash: &[u8; 16]) -> [u8; 24] {
    let mut z_password_hash = [0u8; 21];
    z_password_hash[..16].copy_from_slice(password_hash);

    let mut response = [0u8; 24];
    for i in 0..3 {
        let key7: [u8; 7] = z_password_hash[i * 7..(i + 1) * 7]
            .try_into()
            .expect("7-byte key slice");
        response[i * 8..(i + 1) * 8].copy_from_slice(&des_encrypt(&key7, challenge));
    }
    response
}

/// The expected NT-Response for a challenge pair (RFC 2759 GenerateNTResponse).
pub fn generate_nt_response(
    authenticator_challenge: &[u8; 16],
    peer_challenge: &[u8; 16],
    user_name: &str,
    password: &str,
) -> [u8; 24] {
    let challenge = challenge_hash(peer_challenge, authenticator_challenge, user_name);
    challenge_response(&challenge, &nt_password_hash(password))
}

/// The 20-byte authenticator response rendered as `S=<40 hex>` (RFC 2759
/// GenerateAuthenticatorResponse).
pub fn generate_authenticator_response(
    password: &str,
    nt_response: &[u8; 24],
    peer_challenge: &[u8; 16],
    authenticator_challenge: &[u8; 16],
    user_name: &str,
) -> String {
    let password_hash = nt_password_hash(password);
    let mut hasher = Md4::new();
    hasher.update(password_hash);
    let password_hash_hash: [u8; 16] = hasher.finalize().into();

    let mut hasher = Sha1::new();
    hasher.update(password_hash_hash);
    hasher.update(nt_response);
    hasher.update(MAGIC1);
    let digest = hasher.finalize();

    let challenge = challenge_hash(peer_challenge, authenticator_challenge, user_name);

    let mut hasher = Sha1::new();
    hasher.update(digest);
    hasher.update(challenge);
    hasher.update(MAGIC2);
    let authenticator_response = hasher.finalize();

    format!("S={}", hex::encode_upper(authenticator_response))
}

/// Constant-time verification of an MS-CHAP2-Response. On success returns
/// the authenticator response string for the MS-CHAP2-Success attribute.
pub fn verify_ms_chap2(
    response: &MsChap2Response,
    authenticator_challenge: &[u8; 16],
    user_name: &str,
    password: &str,
) -> Option<String> {
    let expected = generate_nt_response(
        authenticator_challenge,
        &response.peer_challenge,
        user_name,
        password,
    );
    if bool::from(expected.ct_eq(&response.nt_response)) {
        Some(generate_authenticator_response(
            password,
            &response.nt_response,
            &response.peer_challenge,
            authenticator_challenge,
            user_name,
        ))
    } else {
        None
    }
}

/// MS-CHAP2-Success attribute value: the response identifier byte followed
/// by the authenticator response string.
pub fn success_attribute_value(ident: u8, authenticator_response: &str) -> Vec<u8> {
    let mut value = Vec::with_capacity(1 + authenticator_response.len());
    value.push(ident);
    value.extend_from_slice(authenticator_response.as_bytes());
    value
}

/// Expand a 56-bit key to 64 bits with odd parity and run one DES block.
fn des_encrypt(key7: &[u8; 7], block: &[u8; 8]) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[0] = key7[0];
    for i in 1..7 {
        key[i] = (key7[i - 1] << (8 - i)) | (key7[i] >> i);
    }
    key[7] = key7[6] << 1;
    for byte in key.iter_mut() {
        let parity = byte.count_ones() % 2 == 0;
        *byte = (*byte & 0xFE) | parity as u8;
    }

    let cipher = Des::new(GenericArray::from_slice(&key));
    let mut out = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut out);
    out.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 2759 Section 9.2 test vectors
    const USER_NAME: &str = "User";
    const PASSWORD: &str = "clientPass";
    const AUTHENTICATOR_CHALLENGE: [u8; 16] = [
        0x5B, 0x5D, 0x7C, 0x7D, 0x7B, 0x3F, 0x2F, 0x3E, 0x3C, 0x2C, 0x60, 0x21, 0x32, 0x26, 0x26,
        0x28,
    ];
    const PEER_CHALLENGE: [u8; 16] = [
        0x21, 0x40, 0x23, 0x24, 0x25, 0x5E, 0x26, 0x2A, 0x28, 0x29, 0x5F, 0x2B, 0x3A, 0x33, 0x7C,
        0x7E,
    ];

    #[test]
    fn rfc2759_challenge_hash() {
        let challenge = challenge_hash(&PEER_CHALLENGE, &AUTHENTICATOR_CHALLENGE, USER_NAME);
        assert_eq!(challenge, [0xD0, 0x2E, 0x43, 0x86, 0xBC, 0xE9, 0x12, 0x26]);
    }

    #[test]
    fn rfc2759_password_hash() {
        assert_eq!(
            nt_password_hash(PASSWORD),
            [
                0x44, 0xEB, 0xBA, 0x8D, 0x53, 0x12, 0xB8, 0xD6, 0x11, 0x47, 0x44, 0x11, 0xF5,
                0x69, 0x89, 0xAE
            ]
        );
    }

    #[test]
    fn rfc2759_nt_response() {
        let response = generate_nt_response(
            &AUTHENTICATOR_CHALLENGE,
            &PEER_CHALLENGE,
            USER_NAME,
            PASSWORD,
        );
        assert_eq!(
            response,
            [
                0x82, 0x30, 0x9E, 0xCD, 0x8D, 0x70, 0x8B, 0x5E, 0xA0, 0x8F, 0xAA, 0x39, 0x81,
                0xCD, 0x83, 0x54, 0x42, 0x33, 0x11, 0x4A, 0x3D, 0x85, 0xD6, 0xDF
            ]
        );
    }

    #[test]
    fn rfc2759_authenticator_response() {
        let nt_response = generate_nt_response(
            &AUTHENTICATOR_CHALLENGE,
            &PEER_CHALLENGE,
            USER_NAME,
            PASSWORD,
        );
        let auth_response = generate_authenticator_response(
            PASSWORD,
            &nt_response,
            &PEER_CHALLENGE,
            &AUTHENTICATOR_CHALLENGE,
            USER_NAME,
        );
        assert_eq!(auth_response, "S=407A5589115FD0D6209F510FE9C04566932CDA56");
    }

    #[test]
    fn verify_accepts_valid_response() {
        let nt_response = generate_nt_response(
            &AUTHENTICATOR_CHALLENGE,
            &PEER_CHALLENGE,
            USER_NAME,
            PASSWORD,
        );
        let response = MsChap2Response {
            ident: 1,
            flags: 0,
            peer_challenge: PEER_CHALLENGE,
            nt_response,
        };
        let success = verify_ms_chap2(&response, &AUTHENTICATOR_CHALLENGE, USER_NAME, PASSWORD);
        assert_eq!(
            success.as_deref(),
            Some("S=407A5589115FD0D6209F510FE9C04566932CDA56")
        );
        assert!(verify_ms_chap2(&response, &AUTHENTICATOR_CHALLENGE, USER_NAME, "wrong").is_none());
    }

    #[test]
    fn response_parsing() {
        let mut bytes = vec![0x07, 0x00];
        bytes.extend_from_slice(&PEER_CHALLENGE);
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&[0xAA; 24]);
        let parsed = MsChap2Response::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.ident, 0x07);
        assert_eq!(parsed.peer_challenge, PEER_CHALLENGE);
        assert_eq!(parsed.nt_response, [0xAA; 24]);

        assert!(MsChap2Response::from_bytes(&bytes[..49]).is_err());
    }

    #[test]
    fn success_value_layout() {
        let value = success_attribute_value(3, "S=00");
        assert_eq!(value[0], 3);
        assert_eq!(&value[1..], b"S=00");
    }
}
