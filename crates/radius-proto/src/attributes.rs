use crate::packet::PacketError;
use std::net::Ipv4Addr;

/// RADIUS attribute TLV as defined in RFC 2865 Section 5.
///
/// ```text
///  0                   1                   2
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Type      |    Length     |  Value ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u8,
    pub value: Vec<u8>,
}

/// Vendor-Specific attribute code (RFC 2865 Section 5.26)
pub const VENDOR_SPECIFIC: u8 = 26;

impl Attribute {
    /// type + length octets
    pub const MIN_LENGTH: usize = 2;
    pub const MAX_LENGTH: usize = 255;
    pub const MAX_VALUE_LENGTH: usize = 253;

    pub fn new(attr_type: u8, value: Vec<u8>) -> Result<Self, PacketError> {
        if value.len() > Self::MAX_VALUE_LENGTH {
            return Err(PacketError::Attribute(format!(
                "value too long: {} bytes (max {})",
                value.len(),
                Self::MAX_VALUE_LENGTH
            )));
        }
        Ok(Attribute { attr_type, value })
    }

    pub fn string(attr_type: u8, value: impl Into<String>) -> Result<Self, PacketError> {
        Self::new(attr_type, value.into().into_bytes())
    }

    /// 32-bit big-endian integer attribute. Cannot exceed the value limit.
    pub fn integer(attr_type: u8, value: u32) -> Self {
        Attribute {
            attr_type,
            value: value.to_be_bytes().to_vec(),
        }
    }

    pub fn ipv4(attr_type: u8, addr: Ipv4Addr) -> Self {
        Attribute {
            attr_type,
            value: addr.octets().to_vec(),
        }
    }

    /// Wrap a vendor sub-attribute into a Vendor-Specific TLV.
    pub fn vendor(vendor_id: u32, vendor_type: u8, value: Vec<u8>) -> Result<Self, PacketError> {
        VendorAttribute {
            vendor_id,
            vendor_type,
            value,
        }
        .into_attribute()
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let length = self.encoded_length();
        if length > Self::MAX_LENGTH {
            return Err(PacketError::Attribute(format!(
                "encoded attribute too long: {length} bytes"
            )));
        }
        let mut buffer = Vec::with_capacity(length);
        buffer.push(self.attr_type);
        buffer.push(length as u8);
        buffer.extend_from_slice(&self.value);
        Ok(buffer)
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_LENGTH {
            return Err(PacketError::Attribute(format!(
                "attribute data too short: {} bytes",
                data.len()
            )));
        }
        let attr_type = data[0];
        let length = data[1] as usize;
        if !(Self::MIN_LENGTH..=Self::MAX_LENGTH).contains(&length) {
            return Err(PacketError::Attribute(format!(
                "invalid attribute length: {length}"
            )));
        }
        if data.len() < length {
            return Err(PacketError::Attribute(format!(
                "insufficient data for attribute: expected {length}, got {}",
                data.len()
            )));
        }
        Ok(Attribute {
            attr_type,
            value: data[Self::MIN_LENGTH..length].to_vec(),
        })
    }

    pub fn encoded_length(&self) -> usize {
        Self::MIN_LENGTH + self.value.len()
    }

    pub fn as_string(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.value.clone())
    }

    pub fn as_integer(&self) -> Result<u32, PacketError> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().map_err(|_| {
            PacketError::Attribute(format!("expected 4 bytes for integer, got {}", self.value.len()))
        })?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn as_ipv4(&self) -> Result<Ipv4Addr, PacketError> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().map_err(|_| {
            PacketError::Attribute(format!("expected 4 bytes for ipaddr, got {}", self.value.len()))
        })?;
        Ok(Ipv4Addr::from(bytes))
    }

    /// Decode a Vendor-Specific value into its (first) vendor sub-attribute.
    pub fn as_vendor(&self) -> Result<VendorAttribute, PacketError> {
        if self.attr_type != VENDOR_SPECIFIC {
            return Err(PacketError::Attribute(format!(
                "attribute {} is not Vendor-Specific",
                self.attr_type
            )));
        }
        VendorAttribute::decode(&self.value)
    }
}

/// A sub-attribute carried inside a Vendor-Specific attribute:
/// Vendor-Id (4 octets) followed by Vendor-Type, Vendor-Length and the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorAttribute {
    pub vendor_id: u32,
    pub vendor_type: u8,
    pub value: Vec<u8>,
}

impl VendorAttribute {
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < 6 {
            return Err(PacketError::Attribute(format!(
                "vendor attribute too short: {} bytes",
                data.len()
            )));
        }
        let vendor_id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let vendor_type = data[4];
        let vendor_len = data[5] as usize;
        if vendor_len < 2 || data.len() < 4 + vendor_len {
            return Err(PacketError::Attribute(format!(
                "invalid vendor sub-attribute length: {vendor_len}"
            )));
        }
        Ok(VendorAttribute {
            vendor_id,
            vendor_type,
            value: data[6..4 + vendor_len].to_vec(),
        })
    }

    pub fn into_attribute(self) -> Result<Attribute, PacketError> {
        let mut value = Vec::with_capacity(6 + self.value.len());
        value.extend_from_slice(&self.vendor_id.to_be_bytes());
        value.push(self.vendor_type);
        value.push((self.value.len() + 2) as u8);
        value.extend_from_slice(&self.value);
        Attribute::new(VENDOR_SPECIFIC, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_attribute() {
        let attr = Attribute::string(1, "testuser").unwrap();
        assert_eq!(attr.attr_type, 1);
        assert_eq!(attr.as_string().unwrap(), "testuser");
    }

    #[test]
    fn integer_roundtrip() {
        let attr = Attribute::integer(5, 1234);
        let decoded = Attribute::decode(&attr.encode().unwrap()).unwrap();
        assert_eq!(decoded.as_integer().unwrap(), 1234);
    }

    #[test]
    fn value_length_limit() {
        assert!(Attribute::new(1, vec![0u8; 254]).is_err());
    }

    #[test]
    fn vendor_roundtrip() {
        let attr = Attribute::vendor(311, 11, vec![0xAB; 16]).unwrap();
        assert_eq!(attr.attr_type, VENDOR_SPECIFIC);
        let vsa = attr.as_vendor().unwrap();
        assert_eq!(vsa.vendor_id, 311);
        assert_eq!(vsa.vendor_type, 11);
        assert_eq!(vsa.value, vec![0xAB; 16]);
    }

    #[test]
    fn vendor_rejects_short_value() {
        let attr = Attribute::new(VENDOR_SPECIFIC, vec![0, 0, 1, 55, 11]).unwrap();
        assert!(attr.as_vendor().is_err());
    }
}
