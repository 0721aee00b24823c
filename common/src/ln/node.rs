use std::{fmt, str::FromStr};

use bitcoin::secp256k1;
use serde::{Deserialize, Serialize};

/// A Lightning node's public key; identifies route hops and payment
/// destinations.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePk(pub secp256k1::PublicKey);

impl NodePk {
    /// Derive the public key for a secret key. Used by tests and mocks to
    /// mint deterministic node identities.
    pub fn from_secret_key(secret_key: &secp256k1::SecretKey) -> Self {
        let secp = secp256k1::Secp256k1::signing_only();
        Self(secp256k1::PublicKey::from_secret_key(&secp, secret_key))
    }

    pub fn serialize(&self) -> [u8; 33] {
        self.0.serialize()
    }
}

impl FromStr for NodePk {
    type Err = secp256k1::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        secp256k1::PublicKey::from_str(s).map(Self)
    }
}

impl fmt::Display for NodePk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for NodePk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePk({self})")
    }
}

#[cfg(any(test, feature = "test-utils"))]
mod arbitrary_impl {
    use proptest::{
        arbitrary::{Arbitrary, any},
        strategy::{BoxedStrategy, Strategy},
    };

    use super::*;

    impl Arbitrary for NodePk {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;
        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            any::<[u8; 32]>()
                .prop_filter_map("not a valid secret key", |bytes| {
                    secp256k1::SecretKey::from_slice(&bytes).ok()
                })
                .prop_map(|sk| NodePk::from_secret_key(&sk))
                .boxed()
        }
    }
}
