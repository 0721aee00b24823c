#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use crate::serde_helpers::hexstr;

/// A custom TLV record attached to the final hop of a payment onion and
/// surfaced on the receiving HTLC, e.g. `{ "type": "65537", "value": "0000" }`.
#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
pub struct TlvRecord {
    #[serde_as(as = "DisplayFromStr")]
    pub r#type: u64,
    #[serde(with = "hexstr")]
    pub value: Vec<u8>,
}

impl TlvRecord {
    /// Types below this are reserved for the Lightning protocol itself.
    pub const MIN_CUSTOM_TYPE: u64 = 1 << 16;

    pub fn new(r#type: u64, value: Vec<u8>) -> Self {
        Self { r#type, value }
    }

    pub fn is_custom(&self) -> bool {
        self.r#type >= Self::MIN_CUSTOM_TYPE
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::roundtrip;

    #[test]
    fn json_shape() {
        let record = TlvRecord::new(65537, vec![0, 0]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"type":"65537","value":"0000"}"#);
        assert!(record.is_custom());
        assert!(!TlvRecord::new(8, vec![]).is_custom());
    }

    #[test]
    fn json_roundtrip() {
        roundtrip::json_value_roundtrip_proptest::<TlvRecord>();
    }
}
