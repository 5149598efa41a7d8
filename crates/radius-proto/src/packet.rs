use crate::attributes::Attribute;
use std::io::{self, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("invalid packet length: {0}")]
    InvalidLength(usize),
    #[error("invalid packet code: {0}")]
    InvalidCode(u8),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("attribute error: {0}")]
    Attribute(String),
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// RADIUS packet codes (RFC 2865 Section 3, RFC 2866 Section 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    AccessRequest = 1,
    AccessAccept = 2,
    AccessReject = 3,
    AccountingRequest = 4,
    AccountingResponse = 5,
    AccessChallenge = 11,
    StatusServer = 12,
    StatusClient = 13,
}

impl Code {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Code::AccessRequest),
            2 => Some(Code::AccessAccept),
            3 => Some(Code::AccessReject),
            4 => Some(Code::AccountingRequest),
            5 => Some(Code::AccountingResponse),
            11 => Some(Code::AccessChallenge),
            12 => Some(Code::StatusServer),
            13 => Some(Code::StatusClient),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Codes a server expects to receive rather than emit.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Code::AccessRequest | Code::AccountingRequest | Code::StatusServer
        )
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Code::AccessRequest => "Access-Request",
            Code::AccessAccept => "Access-Accept",
            Code::AccessReject => "Access-Reject",
            Code::AccountingRequest => "Accounting-Request",
            Code::AccountingResponse => "Accounting-Response",
            Code::AccessChallenge => "Access-Challenge",
            Code::StatusServer => "Status-Server",
            Code::StatusClient => "Status-Client",
        };
        f.write_str(name)
    }
}

/// RADIUS packet as defined in RFC 2865 Section 3.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Code      |  Identifier   |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Authenticator                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Attributes ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-
/// ```
#[derive(Debug, Clone)]
pub struct Packet {
    pub code: Code,
    pub identifier: u8,
    /// Request Authenticator (16 bytes). For replies this holds the request's
    /// authenticator until the packet is signed.
    pub authenticator: [u8; 16],
    pub attributes: Vec<Attribute>,
}

impl Packet {
    /// 1 code + 1 identifier + 2 length + 16 authenticator
    pub const MIN_PACKET_SIZE: usize = 20;
    /// RFC 2865 maximum
    pub const MAX_PACKET_SIZE: usize = 4096;

    pub fn new(code: Code, identifier: u8, authenticator: [u8; 16]) -> Self {
        Packet {
            code,
            identifier,
            authenticator,
            attributes: Vec::new(),
        }
    }

    /// Start a reply to this packet: identifier and request authenticator are
    /// carried over, the caller picks the code and the reply is signed later.
    pub fn reply(&self, code: Code) -> Packet {
        Packet::new(code, self.identifier, self.authenticator)
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    pub fn find_attribute(&self, attr_type: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    pub fn find_all_attributes(&self, attr_type: u8) -> Vec<&Attribute> {
        self.attributes
            .iter()
            .filter(|a| a.attr_type == attr_type)
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let total = self.length();
        if total > Self::MAX_PACKET_SIZE {
            return Err(PacketError::PacketTooLarge(total));
        }
        let mut buffer = Vec::with_capacity(total);
        buffer.write_all(&[self.code.as_u8(), self.identifier])?;
        buffer.write_all(&(total as u16).to_be_bytes())?;
        buffer.write_all(&self.authenticator)?;
        for attr in &self.attributes {
            buffer.write_all(&attr.encode()?)?;
        }
        Ok(buffer)
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_PACKET_SIZE {
            return Err(PacketError::InvalidLength(data.len()));
        }
        let code = Code::from_u8(data[0]).ok_or(PacketError::InvalidCode(data[0]))?;
        let identifier = data[1];
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if !(Self::MIN_PACKET_SIZE..=Self::MAX_PACKET_SIZE).contains(&length) || data.len() < length
        {
            return Err(PacketError::InvalidLength(length));
        }
        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&data[4..20]);

        let mut attributes = Vec::new();
        let mut rest = &data[Self::MIN_PACKET_SIZE..length];
        while !rest.is_empty() {
            let attr = Attribute::decode(rest)?;
            let consumed = attr.encoded_length();
            attributes.push(attr);
            rest = &rest[consumed..];
        }

        Ok(Packet {
            code,
            identifier,
            authenticator,
            attributes,
        })
    }

    /// Length of the encoded packet.
    pub fn length(&self) -> usize {
        Self::MIN_PACKET_SIZE
            + self
                .attributes
                .iter()
                .map(Attribute::encoded_length)
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut packet = Packet::new(Code::AccessRequest, 42, [1u8; 16]);
        packet.add_attribute(Attribute::string(1, "alice").unwrap());
        packet.add_attribute(Attribute::integer(5, 7));
        let encoded = packet.encode().unwrap();
        let decoded = Packet::decode(&encoded).unwrap();

        assert_eq!(decoded.code, Code::AccessRequest);
        assert_eq!(decoded.identifier, 42);
        assert_eq!(decoded.authenticator, [1u8; 16]);
        assert_eq!(decoded.attributes.len(), 2);
        assert_eq!(decoded.attributes[0].as_string().unwrap(), "alice");
        assert_eq!(decoded.attributes[1].as_integer().unwrap(), 7);
    }

    #[test]
    fn reject_truncated_packet() {
        assert!(Packet::decode(&[0u8; 19]).is_err());
    }

    #[test]
    fn reject_unknown_code() {
        let mut data = vec![99u8, 1, 0, 20];
        data.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            Packet::decode(&data),
            Err(PacketError::InvalidCode(99))
        ));
    }

    #[test]
    fn reply_carries_identifier_and_authenticator() {
        let request = Packet::new(Code::AccessRequest, 9, [7u8; 16]);
        let reply = request.reply(Code::AccessAccept);
        assert_eq!(reply.identifier, 9);
        assert_eq!(reply.authenticator, [7u8; 16]);
        assert_eq!(reply.code, Code::AccessAccept);
    }
}
