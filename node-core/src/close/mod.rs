//! Closed channels and how their force-close outputs were resolved.
//!
//! The node reports closed channels without saying what became of the
//! HTLCs outstanding at close. [`reconcile`] works that out from the closing
//! transaction and the chain transactions spending it, and
//! [`ChannelCloses`] runs it over everything the node knows.

use std::{collections::HashMap, sync::Arc};

use bitcoin::{ScriptBuf, Txid};
use common::{
    api::error::NodeApiError,
    ln::{channel::ChannelId, hashes::PaymentHash, node::NodePk},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    client::{ChainTransaction, NodeClient},
    config::ReconcileConfig,
};

/// Matching closing transaction outputs to their spends.
pub mod reconcile;
/// Listing the transactions that sweep closing outputs.
pub mod sweep;

pub use reconcile::{ReconcileParams, reconcile};
pub use sweep::{SweepTransaction, find_sweeps};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClosedChannel {
    pub id: ChannelId,
    /// Channel capacity in tokens.
    pub capacity: u64,
    pub partner_public_key: NodePk,
    /// Funding outpoint.
    pub transaction_id: Txid,
    pub transaction_vout: u32,
    pub close_transaction_id: Option<Txid>,
    pub close_confirm_height: Option<u32>,

    pub is_cooperative_close: bool,
    pub is_local_force_close: bool,
    pub is_remote_force_close: bool,
    pub is_breach_close: bool,
    pub is_funding_cancel: bool,
    pub is_partner_closed: bool,
    pub is_partner_initiated: bool,

    pub final_local_balance: u64,
    pub final_time_locked_balance: u64,

    /// Our balance output on the closing transaction.
    pub close_balance_vout: Option<u32>,
    pub close_balance_spent_by: Option<Txid>,
    pub close_payments: Vec<ClosePayment>,

    /// Our output script on the closing transaction, if we have one.
    pub close_balance_script: Option<ScriptBuf>,
    /// The HTLCs outstanding when the channel closed.
    pub close_htlcs: Vec<CloseHtlc>,
}

/// An HTLC outstanding at close, as the node remembers it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CloseHtlc {
    pub payment_hash: PaymentHash,
    /// Whether we offered the HTLC.
    pub is_outgoing: bool,
    /// Absolute CLTV expiry.
    pub timeout: u32,
    /// The script committed to by the HTLC's P2WSH output.
    pub witness_script: ScriptBuf,
}

/// The resolution of one HTLC output of a closing transaction. Exactly one
/// of `is_paid`, `is_pending`, `is_refunded` is set.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ClosePayment {
    pub transaction_id: Txid,
    pub transaction_vout: u32,
    pub tokens: u64,
    pub is_outgoing: bool,
    pub is_paid: bool,
    pub is_pending: bool,
    pub is_refunded: bool,
    pub spent_by: Option<Txid>,
}

/// Reconciles the node's closed channels against its chain transactions.
pub struct ChannelCloses<C> {
    client: Arc<C>,
    params: ReconcileParams,
}

impl<C: NodeClient> ChannelCloses<C> {
    pub fn new(client: Arc<C>, config: &ReconcileConfig) -> Self {
        Self {
            client,
            params: ReconcileParams::from(config),
        }
    }

    /// Closed channels with their close outputs resolved against the
    /// current chain state. Channels whose closing transaction the node
    /// hasn't seen are returned as reported.
    #[instrument(skip_all, name = "(closed-channels)")]
    pub async fn get_closed_channels(
        &self,
    ) -> Result<Vec<ClosedChannel>, NodeApiError> {
        let (channels, txs) = tokio::try_join!(
            self.client.get_closed_channels(),
            self.client.get_chain_transactions(),
        )?;
        let txs_by_id = txs
            .iter()
            .map(|tx| (tx.id(), tx))
            .collect::<HashMap<Txid, &ChainTransaction>>();

        let reconciled = channels
            .iter()
            .map(|channel| {
                let closing = channel
                    .close_transaction_id
                    .and_then(|txid| txs_by_id.get(&txid));
                match closing {
                    Some(closing) => reconcile(
                        channel,
                        &closing.transaction,
                        &txs,
                        &self.params,
                    ),
                    None => {
                        debug!(id = %channel.id, "Closing transaction unknown");
                        channel.clone()
                    }
                }
            })
            .collect();
        Ok(reconciled)
    }

    /// Chain transactions spending any output of a closing transaction.
    #[instrument(skip_all, name = "(sweep-transactions)")]
    pub async fn get_sweep_transactions(
        &self,
    ) -> Result<Vec<SweepTransaction>, NodeApiError> {
        let (channels, txs) = tokio::try_join!(
            self.client.get_closed_channels(),
            self.client.get_chain_transactions(),
        )?;
        Ok(find_sweeps(&channels, &txs))
    }
}
