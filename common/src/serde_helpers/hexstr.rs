//! [`serde`] helpers for `Vec<u8>` fields that should appear as lowercase hex
//! strings, e.g. TLV record values and witness elements.
//!
//! ```rust
//! use common::serde_helpers::hexstr;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Foo(#[serde(with = "hexstr")] Vec<u8>);
//! ```

use std::fmt;

use bitcoin::hex::{DisplayHex, FromHex};
use serde::{Deserializer, Serializer, de};

pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&data.to_lower_hex_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    struct HexVisitor;

    impl de::Visitor<'_> for HexVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a hex string")
        }

        fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
            Vec::<u8>::from_hex(s).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_str(HexVisitor)
}

#[cfg(test)]
mod test {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Eq, PartialEq, Serialize, Deserialize)]
    struct Wrapper(#[serde(with = "super")] Vec<u8>);

    #[test]
    fn json_looks_like_hex() {
        let json = serde_json::to_string(&Wrapper(vec![0, 0, 0xab])).unwrap();
        assert_eq!(json, r#""0000ab""#);
        let back = serde_json::from_str::<Wrapper>(&json).unwrap();
        assert_eq!(back, Wrapper(vec![0, 0, 0xab]));
        assert!(serde_json::from_str::<Wrapper>(r#""zz""#).is_err());
    }
}
