//! RFC 2865/2866 authenticators and the User-Password block cipher.

use crate::packet::{Packet, PacketError};
use rand::Rng;
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("invalid encrypted password length: {0}")]
    InvalidLength(usize),
    #[error("decrypted password is not valid UTF-8")]
    InvalidUtf8,
}

/// Random Request Authenticator per RFC 2865 Section 3.
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut authenticator = [0u8; 16];
    rand::rng().fill(&mut authenticator);
    authenticator
}

/// Response Authenticator over an encoded reply:
/// MD5(Code ∥ ID ∥ Length ∥ Request Authenticator ∥ Attributes ∥ Secret).
pub fn response_authenticator(
    encoded_reply: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    let mut data = Vec::with_capacity(encoded_reply.len() + secret.len());
    data.extend_from_slice(&encoded_reply[..4]);
    data.extend_from_slice(request_authenticator);
    data.extend_from_slice(&encoded_reply[Packet::MIN_PACKET_SIZE..]);
    data.extend_from_slice(secret);
    md5::compute(&data).0
}

/// Encode a reply packet and stamp its Response Authenticator. The packet's
/// current authenticator must still hold the request's authenticator.
pub fn sign_reply(reply: &mut Packet, secret: &[u8]) -> Result<Vec<u8>, PacketError> {
    let request_authenticator = reply.authenticator;
    let mut encoded = reply.encode()?;
    let authenticator = response_authenticator(&encoded, &request_authenticator, secret);
    encoded[4..20].copy_from_slice(&authenticator);
    reply.authenticator = authenticator;
    Ok(encoded)
}

/// Verify a received reply against the original request authenticator.
pub fn verify_response_authenticator(
    encoded_reply: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    if encoded_reply.len() < Packet::MIN_PACKET_SIZE {
        return false;
    }
    let expected = response_authenticator(encoded_reply, request_authenticator, secret);
    expected.ct_eq(&encoded_reply[4..20]).into()
}

/// Accounting-Request authenticator per RFC 2866 Section 3:
/// MD5 over the packet with a zeroed authenticator field, then the secret.
pub fn accounting_request_authenticator(encoded: &[u8], secret: &[u8]) -> [u8; 16] {
    let mut data = Vec::with_capacity(encoded.len() + secret.len());
    data.extend_from_slice(&encoded[..4]);
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(&encoded[Packet::MIN_PACKET_SIZE..]);
    data.extend_from_slice(secret);
    md5::compute(&data).0
}

/// Validate an inbound Accounting-Request against the shared secret.
pub fn verify_accounting_request(encoded: &[u8], secret: &[u8]) -> bool {
    if encoded.len() < Packet::MIN_PACKET_SIZE {
        return false;
    }
    let expected = accounting_request_authenticator(encoded, secret);
    expected.ct_eq(&encoded[4..20]).into()
}

/// Encrypt a User-Password value per RFC 2865 Section 5.2: pad to a 16-byte
/// multiple, then XOR each block with MD5(secret ∥ previous block), seeding
/// with the request authenticator.
pub fn encrypt_user_password(password: &str, secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
    let mut padded = password.as_bytes().to_vec();
    let rem = padded.len() % 16;
    if rem != 0 || padded.is_empty() {
        padded.resize(padded.len() + 16 - rem, 0);
    }

    let mut result = Vec::with_capacity(padded.len());
    let mut previous: [u8; 16] = *authenticator;
    for chunk in padded.chunks_exact(16) {
        let digest = keyed_digest(secret, &previous);
        for (i, byte) in chunk.iter().enumerate() {
            previous[i] = byte ^ digest[i];
        }
        result.extend_from_slice(&previous);
    }
    result
}

/// Decrypt a User-Password value per RFC 2865 Section 5.2.
pub fn decrypt_user_password(
    encrypted: &[u8],
    secret: &[u8],
    authenticator: &[u8; 16],
) -> Result<String, CipherError> {
    if encrypted.is_empty() || encrypted.len() % 16 != 0 {
        return Err(CipherError::InvalidLength(encrypted.len()));
    }

    let mut result = Vec::with_capacity(encrypted.len());
    let mut previous: [u8; 16] = *authenticator;
    for chunk in encrypted.chunks_exact(16) {
        let digest = keyed_digest(secret, &previous);
        for (i, byte) in chunk.iter().enumerate() {
            result.push(byte ^ digest[i]);
        }
        previous.copy_from_slice(chunk);
    }

    while result.last() == Some(&0) {
        result.pop();
    }
    String::from_utf8(result).map_err(|_| CipherError::InvalidUtf8)
}

/// Constant-time byte comparison; unequal lengths compare false without
/// inspecting content.
pub fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.len() == right.len() && bool::from(left.ct_eq(right))
}

fn keyed_digest(secret: &[u8], block: &[u8; 16]) -> [u8; 16] {
    let mut data = Vec::with_capacity(secret.len() + 16);
    data.extend_from_slice(secret);
    data.extend_from_slice(block);
    md5::compute(&data).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attribute;
    use crate::packet::Code;

    #[test]
    fn request_authenticators_are_random() {
        assert_ne!(
            generate_request_authenticator(),
            generate_request_authenticator()
        );
    }

    #[test]
    fn password_cipher_roundtrip() {
        let secret = b"sharedsecret";
        let authenticator = [3u8; 16];
        for password in [
            "",
            "pw",
            "exactly-16-chars",
            "a much longer password than one block",
        ] {
            let encrypted = encrypt_user_password(password, secret, &authenticator);
            assert_eq!(encrypted.len() % 16, 0);
            assert!(!encrypted.is_empty());
            let decrypted = decrypt_user_password(&encrypted, secret, &authenticator).unwrap();
            assert_eq!(decrypted, password);
        }
    }

    #[test]
    fn decrypt_rejects_bad_length() {
        assert!(decrypt_user_password(&[0u8; 15], b"s", &[0u8; 16]).is_err());
    }

    #[test]
    fn signed_reply_verifies() {
        let secret = b"sharedsecret";
        let request_authenticator = [9u8; 16];
        let mut reply = Packet::new(Code::AccessAccept, 42, request_authenticator);
        reply.add_attribute(Attribute::string(18, "welcome").unwrap());

        let encoded = sign_reply(&mut reply, secret).unwrap();
        assert!(verify_response_authenticator(
            &encoded,
            &request_authenticator,
            secret
        ));
        assert!(!verify_response_authenticator(
            &encoded,
            &request_authenticator,
            b"wrong"
        ));
    }

    #[test]
    fn accounting_request_verifies() {
        let secret = b"acctsecret";
        let mut request = Packet::new(Code::AccountingRequest, 7, [0u8; 16]);
        request.add_attribute(Attribute::integer(40, 1));
        let mut encoded = request.encode().unwrap();
        let authenticator = accounting_request_authenticator(&encoded, secret);
        encoded[4..20].copy_from_slice(&authenticator);

        assert!(verify_accounting_request(&encoded, secret));
        assert!(!verify_accounting_request(&encoded, b"wrong"));
    }
}
