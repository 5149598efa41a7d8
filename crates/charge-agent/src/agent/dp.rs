//! Read-only views over decoded protocol payloads.

use crate::nav::PathItem;
use radius_proto::dictionary::Dictionary;
use radius_proto::{Packet, VENDOR_SPECIFIC};
use std::sync::Arc;

/// Uniform read access to an inbound payload by path.
pub trait DataProvider: Send + Sync {
    /// Render the field at `path` as a string, `None` when absent.
    fn field_as_string(&self, path: &[PathItem]) -> Option<String>;
}

/// Dictionary-aware view over a decoded RADIUS packet.
///
/// Standard attributes are addressed by name, with `[N]` selecting the Nth
/// occurrence of a repeated attribute; vendor attributes by
/// `Vendor.Attribute`.
pub struct RadiusDataProvider {
    packet: Packet,
    dictionary: Arc<Dictionary>,
}

impl RadiusDataProvider {
    pub fn new(packet: Packet, dictionary: Arc<Dictionary>) -> Self {
        RadiusDataProvider { packet, dictionary }
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    fn vendor_field(&self, vendor_id: u32, item: &PathItem) -> Option<String> {
        let attr = self.dictionary.vendor_attrs(vendor_id)?.get(&item.name)?;
        let wanted = item.index.unwrap_or(0);
        let mut seen = 0;
        for candidate in self.packet.find_all_attributes(VENDOR_SPECIFIC) {
            let Ok(vsa) = candidate.as_vendor() else {
                continue;
            };
            if vsa.vendor_id != vendor_id || vsa.vendor_type != attr.code {
                continue;
            }
            if seen == wanted {
                return Some(attr.kind.render(&vsa.value));
            }
            seen += 1;
        }
        None
    }
}

impl DataProvider for RadiusDataProvider {
    fn field_as_string(&self, path: &[PathItem]) -> Option<String> {
        let first = path.first()?;
        if path.len() >= 2 {
            if let Some(vendor_id) = self.dictionary.vendor_id(&first.name) {
                return self.vendor_field(vendor_id, &path[1]);
            }
        }
        let attr = self.dictionary.attribute(&first.name)?;
        let occurrences = self.packet.find_all_attributes(attr.code);
        let wanted = first.index.unwrap_or(0);
        occurrences
            .get(wanted)
            .map(|found| attr.kind.render(&found.value))
    }
}

/// Map-backed provider for the credit-control-shaped path and tests.
pub struct MapDataProvider {
    root: serde_json::Value,
}

impl MapDataProvider {
    pub fn new(root: serde_json::Value) -> Self {
        MapDataProvider { root }
    }
}

impl DataProvider for MapDataProvider {
    fn field_as_string(&self, path: &[PathItem]) -> Option<String> {
        let mut node = &self.root;
        for item in path {
            node = node.get(&item.name)?;
            if let Some(index) = item.index {
                node = node.get(index)?;
            }
        }
        match node {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav::parse_path;
    use radius_proto::{Attribute, Code};

    fn sample_packet() -> RadiusDataProvider {
        let mut packet = Packet::new(Code::AccessRequest, 1, [0u8; 16]);
        packet.add_attribute(Attribute::string(1, "alice").unwrap());
        packet.add_attribute(Attribute::integer(5, 15));
        packet.add_attribute(Attribute::string(33, "hop-one").unwrap());
        packet.add_attribute(Attribute::string(33, "hop-two").unwrap());
        packet.add_attribute(Attribute::vendor(311, 11, vec![0xCA; 16]).unwrap());
        RadiusDataProvider::new(packet, Arc::new(Dictionary::rfc2865()))
    }

    #[test]
    fn standard_attribute_by_name() {
        let dp = sample_packet();
        assert_eq!(
            dp.field_as_string(&parse_path("User-Name")).as_deref(),
            Some("alice")
        );
        assert_eq!(
            dp.field_as_string(&parse_path("NAS-Port")).as_deref(),
            Some("15")
        );
        assert!(dp.field_as_string(&parse_path("Reply-Message")).is_none());
    }

    #[test]
    fn repeated_attribute_by_index() {
        let dp = sample_packet();
        assert_eq!(
            dp.field_as_string(&parse_path("Proxy-State[0]")).as_deref(),
            Some("hop-one")
        );
        assert_eq!(
            dp.field_as_string(&parse_path("Proxy-State[1]")).as_deref(),
            Some("hop-two")
        );
        assert!(dp.field_as_string(&parse_path("Proxy-State[2]")).is_none());
    }

    #[test]
    fn vendor_attribute_by_qualified_name() {
        let dp = sample_packet();
        assert_eq!(
            dp.field_as_string(&parse_path("Microsoft.MS-CHAP-Challenge"))
                .as_deref(),
            Some(hex::encode([0xCA; 16]).as_str())
        );
        assert!(dp
            .field_as_string(&parse_path("Microsoft.MS-CHAP2-Response"))
            .is_none());
    }

    #[test]
    fn map_provider_walks_nested_values() {
        let dp = MapDataProvider::new(serde_json::json!({
            "CC-Request-Type": 1,
            "Service-Context-Id": "voice",
            "Subscription-Id": [
                {"Subscription-Id-Data": "1001"},
            ],
        }));
        assert_eq!(
            dp.field_as_string(&parse_path("CC-Request-Type")).as_deref(),
            Some("1")
        );
        assert_eq!(
            dp.field_as_string(&parse_path("Subscription-Id[0].Subscription-Id-Data"))
                .as_deref(),
            Some("1001")
        );
        assert!(dp.field_as_string(&parse_path("Missing")).is_none());
    }
}
