use std::{fmt, str::FromStr};

use bitcoin::hex::{DisplayHex, FromHex, HexToArrayError};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use ring::rand::{SecureRandom, SystemRandom};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::sha256;

/// The 32-byte payment hash which identifies an invoice and every HTLC that
/// pays it. Always `sha256(secret)`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[derive(SerializeDisplay, DeserializeFromStr)]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
pub struct PaymentHash([u8; 32]);

/// The 32-byte preimage whose revelation settles an HTLC.
///
/// The [`fmt::Debug`] impl is redacted; use [`fmt::Display`] to print hex.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[derive(SerializeDisplay, DeserializeFromStr)]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
pub struct PaymentSecret([u8; 32]);

// --- impl PaymentHash --- //

impl PaymentHash {
    pub const fn new(inner: [u8; 32]) -> Self {
        Self(inner)
    }

    pub const fn to_array(self) -> [u8; 32] {
        self.0
    }

    pub const fn as_array(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<sha256::Hash> for PaymentHash {
    fn from(hash: sha256::Hash) -> Self {
        Self(hash.to_array())
    }
}

impl FromStr for PaymentHash {
    type Err = HexToArrayError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <[u8; 32]>::from_hex(s).map(Self)
    }
}

impl fmt::Display for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_slice().as_hex())
    }
}

impl fmt::Debug for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentHash({self})")
    }
}

// --- impl PaymentSecret --- //

impl PaymentSecret {
    pub const fn new(inner: [u8; 32]) -> Self {
        Self(inner)
    }

    /// Sample a fresh secret from the system CSPRNG.
    pub fn generate() -> anyhow::Result<Self> {
        let mut inner = [0u8; 32];
        SystemRandom::new()
            .fill(&mut inner)
            .map_err(|_| anyhow::anyhow!("System RNG failed"))?;
        Ok(Self(inner))
    }

    pub const fn as_array(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the [`PaymentHash`] corresponding to this secret.
    pub fn compute_hash(&self) -> PaymentHash {
        PaymentHash::from(sha256::digest(&self.0))
    }

    /// Whether this secret is the preimage of `hash`.
    #[inline]
    pub fn matches(&self, hash: &PaymentHash) -> bool {
        self.compute_hash() == *hash
    }
}

impl FromStr for PaymentSecret {
    type Err = HexToArrayError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <[u8; 32]>::from_hex(s).map(Self)
    }
}

impl fmt::Display for PaymentSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_slice().as_hex())
    }
}

impl fmt::Debug for PaymentSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PaymentSecret(..)")
    }
}

#[cfg(test)]
mod test {
    use proptest::{arbitrary::any, prop_assert, prop_assert_eq, proptest};

    use super::*;
    use crate::test_utils::roundtrip;

    #[test]
    fn hash_binding() {
        proptest!(|(secret in any::<PaymentSecret>())| {
            let hash = secret.compute_hash();
            prop_assert!(secret.matches(&hash));
            prop_assert_eq!(
                hash.to_array(),
                sha256::digest(secret.as_array()).to_array(),
            );
        });
    }

    #[test]
    fn mismatched_secret_does_not_match() {
        proptest!(|(a in any::<PaymentSecret>(), b in any::<PaymentSecret>())| {
            if a != b {
                prop_assert!(!a.matches(&b.compute_hash()));
            }
        });
    }

    #[test]
    fn display_fromstr_roundtrip() {
        roundtrip::fromstr_display_roundtrip_proptest::<PaymentHash>();
        roundtrip::fromstr_display_roundtrip_proptest::<PaymentSecret>();
        roundtrip::json_string_roundtrip_proptest::<PaymentHash>();
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = PaymentSecret::new([7; 32]);
        assert_eq!(format!("{secret:?}"), "PaymentSecret(..)");
    }

    #[test]
    fn generate_is_random() {
        let a = PaymentSecret::generate().unwrap();
        let b = PaymentSecret::generate().unwrap();
        assert_ne!(a, b);
    }
}
