//! RADIUS Wire Protocol
//!
//! Packet and attribute codecs for RFC 2865 (authentication) and RFC 2866
//! (accounting), attribute dictionaries with per-client extension files,
//! and the authentication primitives an AAA front-end needs: the
//! User-Password block cipher, request/response authenticators, CHAP
//! (RFC 2865 Section 5.3) and MS-CHAP-v2 (RFC 2759 / RFC 2548).
//!
//! # Example
//!
//! ```rust
//! use radius_proto::{Attribute, Code, Packet};
//! use radius_proto::auth::{encrypt_user_password, generate_request_authenticator};
//!
//! let authenticator = generate_request_authenticator();
//! let mut packet = Packet::new(Code::AccessRequest, 1, authenticator);
//! packet.add_attribute(Attribute::string(1, "alice").unwrap());
//! packet.add_attribute(
//!     Attribute::new(2, encrypt_user_password("secret", b"shared", &authenticator)).unwrap(),
//! );
//! let bytes = packet.encode().unwrap();
//! assert_eq!(Packet::decode(&bytes).unwrap().attributes.len(), 2);
//! ```

pub mod accounting;
pub mod attributes;
pub mod auth;
pub mod chap;
pub mod dictionary;
pub mod mschap;
pub mod packet;

pub use accounting::AcctStatusType;
pub use attributes::{Attribute, VendorAttribute, VENDOR_SPECIFIC};
pub use auth::{
    accounting_request_authenticator, decrypt_user_password, encrypt_user_password,
    generate_request_authenticator, response_authenticator, sign_reply,
    verify_accounting_request, verify_response_authenticator, CipherError,
};
pub use chap::{compute_chap_response, verify_chap_response, ChapError, ChapResponse};
pub use dictionary::{DictAttribute, Dictionary, DictionaryError, ValueKind, MICROSOFT, VENDOR_MICROSOFT};
pub use mschap::{verify_ms_chap2, MsChap2Response, MsChapError};
pub use packet::{Code, Packet, PacketError};
