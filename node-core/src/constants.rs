//! Default knobs for the node core. Every one of these can be overridden
//! through [`CoreConfig`](crate::config::CoreConfig).

use std::time::Duration;

// --- Payments --- //

/// How many route dispatches a single `pay` call may make before giving up.
pub const DEFAULT_MAX_PAY_ATTEMPTS: u32 = 10;
/// How many channel-disjoint routes may be in flight at once.
pub const DEFAULT_MAX_PARALLEL_ROUTES: usize = 1;
/// Overall deadline for a single `pay` call.
pub const DEFAULT_PAY_DEADLINE: Duration = Duration::from_secs(60);
/// Wait before the first retry after a transient route failure.
pub const DEFAULT_PAY_INITIAL_BACKOFF_MS: u64 = 100;
/// Cap on the wait between retries.
pub const DEFAULT_PAY_MAX_BACKOFF_MS: u64 = 2_000;

// --- Invoices --- //

/// How long an invoice subscriber waits for the next snapshot by default.
pub const DEFAULT_INVOICE_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

// --- Close reconciliation --- //

/// Confirmations a sweep needs before its spend path counts as final.
pub const DEFAULT_SPEND_CONFIRMATIONS: u32 = 1;

// --- Pathfinding --- //

/// Assumed success probability of an unknown hop, in parts per million.
pub const DEFAULT_BASELINE_SUCCESS_RATE_PPM: u64 = 600_000;
/// How heavily a failing node is avoided, in parts per million.
pub const DEFAULT_NODE_IGNORE_RATE_PPM: u64 = 500_000;
/// Time for a failure penalty to decay by half.
pub const DEFAULT_PENALTY_HALF_LIFE_MS: u64 = 60 * 60 * 1000;
/// Number of past payment attempts remembered for scoring.
pub const DEFAULT_MAX_PAYMENT_RECORDS: u64 = 1_000;

/// One million; the denominator for every `*_rate` value.
pub const PPM: u64 = 1_000_000;
