use std::time::Duration;

use common::backoff::Backoff;

use crate::config::PayConfig;

/// Bounds on how hard a single `pay` call tries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total route dispatches allowed, across all candidates.
    pub max_attempts: u32,
    /// Channel-disjoint routes allowed in flight at once.
    pub max_parallel: usize,
    /// Overall deadline, unless the caller supplies one.
    pub deadline: Option<Duration>,
    /// Wait between a transient failure and the next dispatch.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PayConfig::default())
    }
}

impl From<&PayConfig> for RetryPolicy {
    fn from(config: &PayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            max_parallel: config.max_parallel.max(1),
            deadline: config.deadline,
            backoff: config.backoff,
        }
    }
}
