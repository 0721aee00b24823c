//! [`serde`] helpers to consensus-encode [`bitcoin::Transaction`]s as hex.
//!
//! ```rust
//! use common::serde_helpers::consensus_hex_tx;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Foo {
//!     #[serde(with = "consensus_hex_tx")]
//!     tx: bitcoin::Transaction,
//! }
//! ```

use std::fmt;

use bitcoin::consensus;
use serde::{Deserializer, Serializer, de};

pub fn serialize<S>(
    tx: &bitcoin::Transaction,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&consensus::encode::serialize_hex(tx))
}

pub fn deserialize<'de, D>(
    deserializer: D,
) -> Result<bitcoin::Transaction, D::Error>
where
    D: Deserializer<'de>,
{
    struct TxVisitor;

    impl de::Visitor<'_> for TxVisitor {
        type Value = bitcoin::Transaction;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a hex-encoded consensus-serialized transaction")
        }

        fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
            consensus::encode::deserialize_hex(s).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_str(TxVisitor)
}

#[cfg(test)]
mod test {
    use bitcoin::{
        Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
        Witness, absolute, hashes::Hash, transaction,
    };
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Eq, PartialEq, Serialize, Deserialize)]
    struct TxWrapper {
        #[serde(with = "super")]
        tx: Transaction,
    }

    #[test]
    fn json_is_consensus_hex() {
        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array([0x42; 32]),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(50_000),
                script_pubkey: ScriptBuf::new(),
            }],
        };

        let wrapper = TxWrapper { tx };
        let json = serde_json::to_string(&wrapper).unwrap();
        let expected = r#"{"tx":"020000000142424242424242424242424242424242424242424242424242424242424242420000000000ffffffff0150c30000000000000000000000"}"#;
        assert_eq!(json, expected);

        let back = serde_json::from_str::<TxWrapper>(&json).unwrap();
        assert_eq!(back, wrapper);
    }
}
