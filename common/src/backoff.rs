use std::{cmp::min, time::Duration};

use serde::{Deserialize, Serialize};

pub const INITIAL_WAIT_MS: u64 = 250;
pub const MAXIMUM_WAIT_MS: u64 = 32_000;
const EXP_BASE: u64 = 2;

const _: () = assert!(INITIAL_WAIT_MS != 0);

/// Bounds for an exponential backoff schedule.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub initial_wait_ms: u64,
    pub maximum_wait_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_wait_ms: INITIAL_WAIT_MS,
            maximum_wait_ms: MAXIMUM_WAIT_MS,
        }
    }
}

impl Backoff {
    /// Get an iterator of [`Duration`]s which can be passed into e.g.
    /// [`tokio::time::sleep`] to observe time-based exponential backoff.
    ///
    /// ```
    /// # use common::backoff::Backoff;
    /// # #[tokio::test(start_paused = true)]
    /// # async fn backoff_example() {
    /// let mut backoff_durations = Backoff::default().iter();
    /// for _ in 0..10 {
    ///     tokio::time::sleep(backoff_durations.next().unwrap()).await;
    /// }
    /// # }
    /// ```
    pub fn iter(self) -> impl Iterator<Item = Duration> + Send + 'static {
        let Self {
            initial_wait_ms,
            maximum_wait_ms,
        } = self;
        (0u32..).map(move |index| {
            let factor = EXP_BASE.saturating_pow(index);
            let wait_ms = initial_wait_ms.saturating_mul(factor);
            Duration::from_millis(min(wait_ms, maximum_wait_ms))
        })
    }
}
