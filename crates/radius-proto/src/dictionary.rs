//! Attribute dictionaries.
//!
//! The agent resolves attribute names to wire codes through a dictionary.
//! A built-in dictionary covers RFC 2865/2866 plus the Microsoft vendor
//! block; additional FreeRADIUS-format dictionary files can be layered on
//! top per client (`ATTRIBUTE`, `VENDOR`, `BEGIN-VENDOR`/`END-VENDOR`
//! directives, `#` comments).

use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DictionaryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dictionary parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("unknown vendor: {0}")]
    UnknownVendor(String),
    #[error("cannot encode {value:?} as {kind:?}")]
    Encode { kind: ValueKind, value: String },
}

/// Wire representation of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
    Address,
    Octets,
    Date,
}

impl ValueKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" | "text" => Some(ValueKind::Text),
            "integer" => Some(ValueKind::Integer),
            "ipaddr" => Some(ValueKind::Address),
            "octets" => Some(ValueKind::Octets),
            "date" | "time" => Some(ValueKind::Date),
            _ => None,
        }
    }

    /// Render raw attribute bytes as a string for filters and templates.
    pub fn render(self, value: &[u8]) -> String {
        match self {
            ValueKind::Text => String::from_utf8_lossy(value).into_owned(),
            ValueKind::Integer | ValueKind::Date => match <[u8; 4]>::try_from(value) {
                Ok(bytes) => u32::from_be_bytes(bytes).to_string(),
                Err(_) => hex::encode(value),
            },
            ValueKind::Address => match <[u8; 4]>::try_from(value) {
                Ok(bytes) => Ipv4Addr::from(bytes).to_string(),
                Err(_) => hex::encode(value),
            },
            ValueKind::Octets => hex::encode(value),
        }
    }

    /// Encode a string value into raw attribute bytes.
    pub fn encode(self, value: &str) -> Result<Vec<u8>, DictionaryError> {
        let fail = || DictionaryError::Encode {
            kind: self,
            value: value.to_string(),
        };
        match self {
            ValueKind::Text => Ok(value.as_bytes().to_vec()),
            ValueKind::Integer | ValueKind::Date => value
                .parse::<u32>()
                .map(|v| v.to_be_bytes().to_vec())
                .map_err(|_| fail()),
            ValueKind::Address => value
                .parse::<Ipv4Addr>()
                .map(|a| a.octets().to_vec())
                .map_err(|_| fail()),
            ValueKind::Octets => hex::decode(value).map_err(|_| fail()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DictAttribute {
    pub name: String,
    pub code: u8,
    pub kind: ValueKind,
}

/// Name/code mappings for the standard attribute space and per-vendor
/// sub-attribute spaces. Read-mostly: built once, shared behind `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    attrs_by_name: HashMap<String, DictAttribute>,
    names_by_code: HashMap<u8, String>,
    vendors_by_name: HashMap<String, u32>,
    vendors_by_id: HashMap<u32, String>,
    vendor_attrs: HashMap<u32, HashMap<String, DictAttribute>>,
    vendor_names_by_code: HashMap<(u32, u8), String>,
}

/// Microsoft vendor id (MS-CHAP attribute family)
pub const VENDOR_MICROSOFT: u32 = 311;
pub const MICROSOFT: &str = "Microsoft";

impl Dictionary {
    pub fn new() -> Self {
        Dictionary::default()
    }

    /// The built-in dictionary: RFC 2865/2866 standard attributes plus the
    /// Microsoft vendor block needed for MS-CHAP-v2.
    pub fn rfc2865() -> Self {
        use ValueKind::*;
        let mut dict = Dictionary::new();
        for (name, code, kind) in [
            ("User-Name", 1u8, Text),
            ("User-Password", 2, Octets),
            ("CHAP-Password", 3, Octets),
            ("NAS-IP-Address", 4, Address),
            ("NAS-Port", 5, Integer),
            ("Service-Type", 6, Integer),
            ("Framed-Protocol", 7, Integer),
            ("Framed-IP-Address", 8, Address),
            ("Filter-Id", 11, Text),
            ("Framed-MTU", 12, Integer),
            ("Reply-Message", 18, Text),
            ("State", 24, Octets),
            ("Class", 25, Octets),
            ("Vendor-Specific", 26, Octets),
            ("Session-Timeout", 27, Integer),
            ("Idle-Timeout", 28, Integer),
            ("Called-Station-Id", 30, Text),
            ("Calling-Station-Id", 31, Text),
            ("NAS-Identifier", 32, Text),
            ("Proxy-State", 33, Octets),
            ("Acct-Status-Type", 40, Integer),
            ("Acct-Delay-Time", 41, Integer),
            ("Acct-Input-Octets", 42, Integer),
            ("Acct-Output-Octets", 43, Integer),
            ("Acct-Session-Id", 44, Text),
            ("Acct-Authentic", 45, Integer),
            ("Acct-Session-Time", 46, Integer),
            ("Acct-Terminate-Cause", 49, Integer),
            ("Event-Timestamp", 55, Date),
            ("CHAP-Challenge", 60, Octets),
            ("NAS-Port-Type", 61, Integer),
            ("Port-Limit", 62, Integer),
        ] {
            dict.add_attribute(name, code, kind);
        }
        dict.add_vendor(MICROSOFT, VENDOR_MICROSOFT);
        for (name, code, kind) in [
            ("MS-CHAP-Response", 1u8, Octets),
            ("MS-CHAP-Challenge", 11, Octets),
            ("MS-CHAP2-Response", 25, Octets),
            ("MS-CHAP2-Success", 26, Octets),
        ] {
            dict.add_vendor_attribute(VENDOR_MICROSOFT, name, code, kind);
        }
        dict
    }

    pub fn add_attribute(&mut self, name: &str, code: u8, kind: ValueKind) {
        self.names_by_code.insert(code, name.to_string());
        self.attrs_by_name.insert(
            name.to_string(),
            DictAttribute {
                name: name.to_string(),
                code,
                kind,
            },
        );
    }

    pub fn add_vendor(&mut self, name: &str, id: u32) {
        self.vendors_by_name.insert(name.to_string(), id);
        self.vendors_by_id.insert(id, name.to_string());
    }

    pub fn add_vendor_attribute(&mut self, vendor_id: u32, name: &str, code: u8, kind: ValueKind) {
        self.vendor_names_by_code
            .insert((vendor_id, code), name.to_string());
        self.vendor_attrs.entry(vendor_id).or_default().insert(
            name.to_string(),
            DictAttribute {
                name: name.to_string(),
                code,
                kind,
            },
        );
    }

    pub fn attribute(&self, name: &str) -> Option<&DictAttribute> {
        self.attrs_by_name.get(name)
    }

    pub fn attribute_by_code(&self, code: u8) -> Option<&DictAttribute> {
        self.names_by_code
            .get(&code)
            .and_then(|name| self.attrs_by_name.get(name))
    }

    pub fn vendor_id(&self, name: &str) -> Option<u32> {
        self.vendors_by_name.get(name).copied()
    }

    pub fn vendor_name(&self, id: u32) -> Option<&str> {
        self.vendors_by_id.get(&id).map(String::as_str)
    }

    /// All sub-attributes registered for a vendor, by name.
    pub fn vendor_attrs(&self, vendor_id: u32) -> Option<&HashMap<String, DictAttribute>> {
        self.vendor_attrs.get(&vendor_id)
    }

    pub fn vendor_attribute(&self, vendor: &str, name: &str) -> Option<(u32, &DictAttribute)> {
        let vendor_id = self.vendor_id(vendor)?;
        self.vendor_attrs
            .get(&vendor_id)?
            .get(name)
            .map(|attr| (vendor_id, attr))
    }

    pub fn vendor_attribute_by_code(&self, vendor_id: u32, code: u8) -> Option<&DictAttribute> {
        self.vendor_names_by_code
            .get(&(vendor_id, code))
            .and_then(|name| self.vendor_attrs.get(&vendor_id)?.get(name))
    }

    /// Apply FreeRADIUS-format dictionary text on top of this dictionary.
    pub fn parse(&mut self, text: &str) -> Result<(), DictionaryError> {
        let mut current_vendor: Option<u32> = None;
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let parse_err = |reason: String| DictionaryError::Parse {
                line: idx + 1,
                reason,
            };
            match fields[0] {
                "ATTRIBUTE" => {
                    if fields.len() < 4 {
                        return Err(parse_err("ATTRIBUTE needs name, code and type".into()));
                    }
                    let code: u8 = fields[2]
                        .parse()
                        .map_err(|_| parse_err(format!("invalid attribute code {}", fields[2])))?;
                    let kind = ValueKind::from_name(fields[3])
                        .ok_or_else(|| parse_err(format!("unknown value type {}", fields[3])))?;
                    match current_vendor {
                        Some(vendor_id) => {
                            self.add_vendor_attribute(vendor_id, fields[1], code, kind)
                        }
                        None => self.add_attribute(fields[1], code, kind),
                    }
                }
                "VENDOR" => {
                    if fields.len() < 3 {
                        return Err(parse_err("VENDOR needs name and id".into()));
                    }
                    let id: u32 = fields[2]
                        .parse()
                        .map_err(|_| parse_err(format!("invalid vendor id {}", fields[2])))?;
                    self.add_vendor(fields[1], id);
                }
                "BEGIN-VENDOR" => {
                    if fields.len() < 2 {
                        return Err(parse_err("BEGIN-VENDOR needs a name".into()));
                    }
                    current_vendor = Some(
                        self.vendor_id(fields[1])
                            .ok_or_else(|| DictionaryError::UnknownVendor(fields[1].into()))?,
                    );
                }
                "END-VENDOR" => current_vendor = None,
                _ => {} // unsupported directives are skipped
            }
        }
        Ok(())
    }

    /// Load every dictionary file in a folder on top of the built-in
    /// RFC 2865 dictionary.
    pub fn from_folder_with_rfc2865<P: AsRef<Path>>(path: P) -> Result<Self, DictionaryError> {
        let mut dict = Dictionary::rfc2865();
        let mut entries: Vec<_> = fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        for file in entries {
            dict.parse(&fs::read_to_string(file)?)?;
        }
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_standard_attributes() {
        let dict = Dictionary::rfc2865();
        let user_name = dict.attribute("User-Name").unwrap();
        assert_eq!(user_name.code, 1);
        assert_eq!(user_name.kind, ValueKind::Text);
        assert_eq!(dict.attribute_by_code(40).unwrap().name, "Acct-Status-Type");
        let (vendor_id, challenge) = dict.vendor_attribute(MICROSOFT, "MS-CHAP-Challenge").unwrap();
        assert_eq!(vendor_id, VENDOR_MICROSOFT);
        assert_eq!(challenge.code, 11);
    }

    #[test]
    fn parse_freeradius_format() {
        let mut dict = Dictionary::rfc2865();
        dict.parse(
            "# comment\n\
             ATTRIBUTE Sip-From-Tag 105 string\n\
             VENDOR Cisco 9\n\
             BEGIN-VENDOR Cisco\n\
             ATTRIBUTE Cisco-AVPair 1 string\n\
             END-VENDOR Cisco\n",
        )
        .unwrap();
        assert_eq!(dict.attribute("Sip-From-Tag").unwrap().code, 105);
        let (vendor_id, avpair) = dict.vendor_attribute("Cisco", "Cisco-AVPair").unwrap();
        assert_eq!(vendor_id, 9);
        assert_eq!(avpair.code, 1);
        assert_eq!(dict.vendor_attribute_by_code(9, 1).unwrap().name, "Cisco-AVPair");
    }

    #[test]
    fn parse_rejects_bad_code() {
        let mut dict = Dictionary::new();
        assert!(dict.parse("ATTRIBUTE Foo bar string").is_err());
    }

    #[test]
    fn render_and_encode_values() {
        assert_eq!(ValueKind::Integer.render(&1234u32.to_be_bytes()), "1234");
        assert_eq!(ValueKind::Address.render(&[10, 0, 0, 1]), "10.0.0.1");
        assert_eq!(ValueKind::Integer.encode("7").unwrap(), vec![0, 0, 0, 7]);
        assert_eq!(
            ValueKind::Address.encode("127.0.0.1").unwrap(),
            vec![127, 0, 0, 1]
        );
        assert!(ValueKind::Integer.encode("abc").is_err());
    }
}
