//! Paying: resolving a target, choosing and checking routes, dispatching
//! them, and reporting the outcome.

use std::time::Duration;

use common::ln::{
    hashes::{PaymentHash, PaymentSecret},
    node::NodePk,
    tlv::TlvRecord,
};
use common::time::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::client::PaymentDetails;

/// The payment executor.
pub mod executor;
/// Attempt budget, parallelism, backoff, and deadline.
pub mod policy;
/// Per-hop amount and timeout computation.
pub mod route;

pub use executor::PaymentExecutor;
pub use policy::RetryPolicy;
pub use route::{Hop, Route};

/// What to pay.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PaymentTarget {
    /// A fully computed route paying payment hash `id`.
    Route { id: PaymentHash, route: Route },
    /// Already decoded payment details.
    Details(PaymentDetails),
    /// An encoded payment request, decoded by the node.
    Request(String),
}

/// Caller-supplied limits on a payment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PayConstraints {
    /// Absolute block height. Routes whose first hop times out later are
    /// rejected.
    pub max_timeout_height: Option<u32>,
    /// Routes charging more in total fees are rejected.
    pub max_fee_mtokens: Option<u64>,
    /// Custom TLV records for the final hop.
    pub messages: Vec<TlvRecord>,
    /// Pay this payment hash instead of the target's.
    pub id: Option<PaymentHash>,
    /// Overrides the policy's overall deadline.
    pub deadline: Option<Duration>,
}

/// A successful payment.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub destination: NodePk,
    pub id: PaymentHash,
    /// Total paid, fees included.
    pub mtokens: u64,
    pub tokens: u64,
    pub fee: u64,
    pub fee_mtokens: u64,
    pub hops: Vec<Hop>,
    /// When settlement was observed.
    pub confirmed_at: TimestampMs,
    pub secret: PaymentSecret,
    pub messages: Vec<TlvRecord>,
}
