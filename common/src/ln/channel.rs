use std::{fmt, str::FromStr};

use anyhow::{Context, ensure};
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// A short channel id: the funding output's location on chain, displayed as
/// `<block height>x<tx index>x<output index>`, e.g. `443x1x0`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[derive(SerializeDisplay, DeserializeFromStr)]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
pub struct ChannelId {
    #[cfg_attr(
        any(test, feature = "test-utils"),
        proptest(strategy = "0..=0xff_ffffu32")
    )]
    pub block: u32,
    #[cfg_attr(
        any(test, feature = "test-utils"),
        proptest(strategy = "0..=0xff_ffffu32")
    )]
    pub tx: u32,
    pub output: u16,
}

impl ChannelId {
    const MAX_BLOCK: u32 = (1 << 24) - 1;
    const MAX_TX: u32 = (1 << 24) - 1;

    pub const fn new(block: u32, tx: u32, output: u16) -> Self {
        Self { block, tx, output }
    }

    /// The BOLT 7 packed `u64` form.
    pub fn to_u64(self) -> u64 {
        (u64::from(self.block) << 40)
            | (u64::from(self.tx) << 16)
            | u64::from(self.output)
    }

    pub fn from_u64(scid: u64) -> Self {
        Self {
            block: (scid >> 40) as u32,
            tx: ((scid >> 16) & 0xff_ffff) as u32,
            output: (scid & 0xffff) as u16,
        }
    }
}

impl FromStr for ChannelId {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('x');
        let mut next = |what: &str| {
            parts
                .next()
                .with_context(|| format!("Channel id missing {what}"))
        };
        let block = next("block")?.parse::<u32>().context("Bad block")?;
        let tx = next("tx")?.parse::<u32>().context("Bad tx index")?;
        let output = next("output")?.parse::<u16>().context("Bad output")?;
        ensure!(parts.next().is_none(), "Channel id has trailing parts");
        ensure!(block <= Self::MAX_BLOCK, "Block height too large");
        ensure!(tx <= Self::MAX_TX, "Tx index too large");
        Ok(Self { block, tx, output })
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { block, tx, output } = self;
        write!(f, "{block}x{tx}x{output}")
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({self})")
    }
}
