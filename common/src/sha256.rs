//! SHA-256 hashing, backed by `ring`.
//!
//! Payment hashes in Lightning are the SHA-256 of the payment secret, so
//! everything that binds a secret to an invoice or recognizes a preimage in a
//! witness goes through here.

use std::{fmt, str::FromStr};

use bitcoin::hex::{DisplayHex, FromHex, HexToArrayError};

pub const HASH_LEN: usize = 32;

/// A SHA-256 hash value.
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Hash([u8; HASH_LEN]);

/// SHA-256 digest a single input.
pub fn digest(input: &[u8]) -> Hash {
    digest_many(&[input])
}

/// SHA-256 digest several input slices concatenated together, without
/// allocating.
pub fn digest_many(inputs: &[&[u8]]) -> Hash {
    let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
    for input in inputs {
        ctx.update(input);
    }
    Hash::from_ring(ctx.finish())
}

impl Hash {
    pub const fn new(value: [u8; HASH_LEN]) -> Self {
        Self(value)
    }

    pub const fn to_array(self) -> [u8; HASH_LEN] {
        self.0
    }

    pub const fn as_array(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    // Not pub, since `ring::digest::Digest` is not always SHA-256, but we can
    // guarantee the output length inside this module.
    fn from_ring(output: ring::digest::Digest) -> Self {
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(output.as_ref());
        Self(out)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl FromStr for Hash {
    type Err = HexToArrayError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <[u8; HASH_LEN]>::from_hex(s).map(Self)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_slice().as_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}
