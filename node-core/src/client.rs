//! The interface to the underlying Lightning node.
//!
//! Everything the node core knows about the network, the chain, and the
//! node's own invoices comes through a [`NodeClient`]. The production
//! implementation talks to a real node over RPC; tests use
//! [`MockNode`](crate::test_utils::MockNode).

use std::fmt;

use async_trait::async_trait;
use bitcoin::{BlockHash, Transaction, Txid};
use common::{
    api::error::NodeApiError,
    ln::{
        channel::ChannelId, hashes::PaymentHash, hashes::PaymentSecret,
        node::NodePk, tlv::TlvRecord,
    },
    serde_helpers::consensus_hex_tx,
    time::TimestampMs,
};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{
    close::ClosedChannel,
    invoice::{Invoice, InvoiceEvent},
    pathfinding::{PathfindingConfig, PathfindingConfigUpdate},
    pay::route::{Hop, Route},
};

/// A live feed of node-side events for a single invoice.
pub type InvoiceEventStream =
    BoxStream<'static, Result<InvoiceEvent, NodeApiError>>;

#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    /// The current best block height.
    async fn get_height(&self) -> Result<u32, NodeApiError>;

    /// Subscribe to HTLC and resolution events for invoice `id`. Only events
    /// which occur after the subscription is established are delivered.
    async fn subscribe_invoice(
        &self,
        id: PaymentHash,
    ) -> Result<InvoiceEventStream, NodeApiError>;

    async fn create_hold_invoice(
        &self,
        req: CreateHoldInvoice,
    ) -> Result<Invoice, NodeApiError>;

    async fn settle_hold_invoice(
        &self,
        secret: PaymentSecret,
    ) -> Result<(), NodeApiError>;

    async fn cancel_hold_invoice(
        &self,
        id: PaymentHash,
    ) -> Result<(), NodeApiError>;

    async fn decode_payment_request(
        &self,
        request: &str,
    ) -> Result<PaymentDetails, NodeApiError>;

    /// Candidate routes to `req.destination`, best first. An empty list
    /// means the node knows no route.
    async fn find_routes(
        &self,
        req: FindRoutes,
    ) -> Result<Vec<CandidateRoute>, NodeApiError>;

    /// Send an HTLC along a fully computed route and wait for it to
    /// resolve.
    async fn dispatch_route(
        &self,
        dispatch: RouteDispatch,
    ) -> Result<RouteOutcome, NodeApiError>;

    /// Closed channels as the node reports them. `close_payments` and the
    /// close balance outpoint are left for reconciliation to fill in.
    async fn get_closed_channels(
        &self,
    ) -> Result<Vec<ClosedChannel>, NodeApiError>;

    async fn get_chain_transactions(
        &self,
    ) -> Result<Vec<ChainTransaction>, NodeApiError>;

    /// Fails with [`Unsupported`] when the node predates configurable
    /// pathfinding.
    ///
    /// [`Unsupported`]: common::api::error::NodeErrorKind::Unsupported
    async fn get_pathfinding_settings(
        &self,
    ) -> Result<PathfindingConfig, NodeApiError>;

    async fn update_pathfinding_settings(
        &self,
        update: PathfindingConfigUpdate,
    ) -> Result<(), NodeApiError>;
}

// --- Request types --- //

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CreateHoldInvoice {
    pub tokens: u64,
    /// Final CLTV delta the payer must leave for us.
    pub cltv_delta: u32,
    /// The payment hash to use. The node generates a fresh secret when
    /// this is `None`.
    pub id: Option<PaymentHash>,
    pub description: Option<String>,
}

/// A decoded payment request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub destination: NodePk,
    pub id: PaymentHash,
    pub mtokens: u64,
    /// The final CLTV delta requested by the payee.
    pub cltv_delta: u32,
    pub description: Option<String>,
    pub expires_at: Option<TimestampMs>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FindRoutes {
    pub destination: NodePk,
    /// Amount to deliver, before routing fees.
    pub mtokens: u64,
    pub final_cltv_delta: u32,
    /// Routes whose first-hop timeout exceeds this absolute height are
    /// useless to the caller.
    pub max_timeout_height: Option<u32>,
    /// Channels to route around.
    pub ignore: Vec<ChannelId>,
}

/// A route suggested by the node, before amounts and timeouts are worked
/// out. Hop `i`'s policy is the one its node applies when forwarding to
/// hop `i + 1`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandidateRoute {
    pub hops: Vec<CandidateHop>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandidateHop {
    pub channel_id: ChannelId,
    /// Channel capacity in tokens.
    pub channel_capacity: u64,
    /// The node at the far end of the channel.
    pub public_key: NodePk,
    pub base_fee_mtokens: u64,
    /// Proportional fee, in millionths.
    pub fee_rate: u64,
    pub cltv_delta: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RouteDispatch {
    pub id: PaymentHash,
    pub route: Route,
    pub messages: Vec<TlvRecord>,
}

// --- Route outcomes --- //

/// How a dispatched HTLC resolved.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RouteOutcome {
    /// The destination released the secret.
    Success {
        secret: PaymentSecret,
        settled_at: Option<TimestampMs>,
        /// The hops as the remote state confirmed them, if the node
        /// reports them.
        hops: Option<Vec<Hop>>,
    },
    /// An intermediate hop failed; another route may work.
    TransientFailure {
        /// Index into the route's hops of the failing hop.
        hop: usize,
        reason: TransientReason,
    },
    /// The destination rejected the payment. Retrying cannot help.
    TerminalFailure { reason: TerminalReason },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientReason {
    TemporaryChannelFailure,
    ChannelDisabled,
    InsufficientBalance,
    FeeInsufficient,
    ExpiryTooSoon,
    UnknownNextPeer,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// Unknown payment hash, wrong amount, or an invoice that was already
    /// resolved.
    IncorrectPaymentDetails,
    /// The payee canceled the held HTLC.
    Canceled,
}

impl fmt::Display for TransientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TemporaryChannelFailure => "temporary channel failure",
            Self::ChannelDisabled => "channel disabled",
            Self::InsufficientBalance => "insufficient balance",
            Self::FeeInsufficient => "fee insufficient",
            Self::ExpiryTooSoon => "expiry too soon",
            Self::UnknownNextPeer => "unknown next peer",
        };
        f.write_str(s)
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IncorrectPaymentDetails => "incorrect payment details",
            Self::Canceled => "payment canceled by destination",
        };
        f.write_str(s)
    }
}

// --- Chain transactions --- //

/// An on-chain transaction relevant to the node's wallet.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChainTransaction {
    #[serde(with = "consensus_hex_tx")]
    pub transaction: Transaction,
    /// Zero while unconfirmed.
    pub confirmation_count: u32,
    pub confirmation_height: Option<u32>,
    pub block_id: Option<BlockHash>,
    pub created_at: Option<TimestampMs>,
}

impl ChainTransaction {
    pub fn id(&self) -> Txid {
        self.transaction.compute_txid()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmation_count > 0
    }
}

#[cfg(test)]
mod test {
    use common::test_utils::{arbitrary::any_raw_tx, roundtrip};
    use proptest::{arbitrary::any, option, strategy::Strategy};

    use super::*;

    #[test]
    fn chain_transaction_json_roundtrip() {
        let strategy = (any_raw_tx(), any::<u32>(), option::of(any::<u32>()))
            .prop_map(|(transaction, confirmation_count, height)| {
                ChainTransaction {
                    transaction,
                    confirmation_count,
                    confirmation_height: height,
                    block_id: None,
                    created_at: None,
                }
            });
        roundtrip::json_value_custom(strategy, Default::default());
    }

    #[test]
    fn reasons_serialize_snake_case() {
        let json =
            serde_json::to_string(&TransientReason::ChannelDisabled).unwrap();
        assert_eq!(json, "\"channel_disabled\"");
        let json = serde_json::to_string(&TerminalReason::Canceled).unwrap();
        assert_eq!(json, "\"canceled\"");
    }
}
