use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, ensure};
use serde::{Deserialize, Deserializer, Serialize, de};

/// Milliseconds since the [`UNIX_EPOCH`], never negative.
///
/// Stamps invoice and HTLC lifecycle events (`created_at`, `confirmed_at`,
/// `canceled_at`) and drives penalty decay in route scoring.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct TimestampMs(i64);

impl TimestampMs {
    pub const MIN: Self = Self(0);

    /// The current wall clock time. A clock set before 1970 reads as
    /// [`TimestampMs::MIN`].
    pub fn now() -> Self {
        Self::try_from(SystemTime::now()).unwrap_or(Self::MIN)
    }

    /// Zero if `earlier` is actually later than `self`.
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        let millis = u64::try_from(self.0 - earlier.0).unwrap_or(0);
        Duration::from_millis(millis)
    }

    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        let millis = i64::try_from(duration.as_millis()).ok()?;
        self.0.checked_add(millis).map(Self)
    }
}

impl TryFrom<SystemTime> for TimestampMs {
    type Error = anyhow::Error;
    fn try_from(time: SystemTime) -> anyhow::Result<Self> {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .context("System time precedes the unix epoch")?;
        let millis = i64::try_from(since_epoch.as_millis())
            .context("System time overflows i64 milliseconds")?;
        Ok(Self(millis))
    }
}

impl TryFrom<i64> for TimestampMs {
    type Error = anyhow::Error;
    fn try_from(millis: i64) -> anyhow::Result<Self> {
        ensure!(millis >= 0, "Negative timestamp: {millis}");
        Ok(Self(millis))
    }
}

impl From<u32> for TimestampMs {
    fn from(millis: u32) -> Self {
        Self(i64::from(millis))
    }
}

impl fmt::Display for TimestampMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl<'de> Deserialize<'de> for TimestampMs {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Self::try_from(millis).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Signed(millis),
                &"a non-negative millisecond timestamp",
            )
        })
    }
}

#[cfg(any(test, feature = "test-utils"))]
mod arbitrary_impl {
    use proptest::{
        arbitrary::Arbitrary,
        strategy::{BoxedStrategy, Strategy},
    };

    use super::*;

    impl Arbitrary for TimestampMs {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;
        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            (0..i64::MAX).prop_map(Self).boxed()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::roundtrip;

    #[test]
    fn timestamp_roundtrip() {
        roundtrip::json_string_roundtrip_proptest::<TimestampMs>();
    }

    #[test]
    fn rejects_negative() {
        assert_eq!(serde_json::from_str::<TimestampMs>("42").unwrap().0, 42);
        assert_eq!(serde_json::from_str::<TimestampMs>("0").unwrap().0, 0);
        assert!(serde_json::from_str::<TimestampMs>("-42").is_err());
        assert!(TimestampMs::try_from(-1_i64).is_err());
    }

    #[test]
    fn duration_since_saturates() {
        let a = TimestampMs::from(1_000);
        let b = TimestampMs::from(4_500);
        assert_eq!(b.saturating_duration_since(a), Duration::from_millis(3_500));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
        assert_eq!(
            a.checked_add(Duration::from_secs(1)),
            Some(TimestampMs::from(2_000)),
        );
    }
}
