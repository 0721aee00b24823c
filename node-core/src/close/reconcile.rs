use bitcoin::{OutPoint, ScriptBuf, Transaction, TxIn, Txid};
use common::{ln::hashes::PaymentHash, sha256};

use super::{CloseHtlc, ClosePayment, ClosedChannel};
use crate::{
    client::ChainTransaction, config::ReconcileConfig,
    constants::DEFAULT_SPEND_CONFIRMATIONS,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconcileParams {
    /// Confirmations a spend needs before its outcome is final. Shallower
    /// spends leave the output pending.
    pub spend_confirmations: u32,
}

impl Default for ReconcileParams {
    fn default() -> Self {
        Self {
            spend_confirmations: DEFAULT_SPEND_CONFIRMATIONS,
        }
    }
}

impl From<&ReconcileConfig> for ReconcileParams {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            spend_confirmations: config.spend_confirmations,
        }
    }
}

/// How an HTLC output is resolved as of some chain state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Resolution {
    /// Unspent, spent too shallowly, or spent by a path we don't recognize.
    Pending { spent_by: Option<Txid> },
    /// Spent by revealing the preimage.
    Paid { spent_by: Txid },
    /// Spent through the timeout path.
    Refunded { spent_by: Txid },
}

/// Which branch of the HTLC script a spend took.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SpendPath {
    Success,
    Timeout,
}

/// Rebuild `channel`'s close outputs against `closing_tx` and the chain
/// transactions `spends` which may spend them.
///
/// This is a pure function of its inputs: the previous `close_payments` and
/// balance fields are discarded and recomputed, so calling it again on the
/// same inputs gives the same output, and calling it on a newer chain state
/// reflects reorgs and new spends.
pub fn reconcile(
    channel: &ClosedChannel,
    closing_tx: &Transaction,
    spends: &[ChainTransaction],
    params: &ReconcileParams,
) -> ClosedChannel {
    let close_txid = closing_tx.compute_txid();

    let mut reconciled = channel.clone();
    reconciled.close_transaction_id = Some(close_txid);
    reconciled.close_balance_vout = None;
    reconciled.close_balance_spent_by = None;
    reconciled.close_payments = Vec::new();

    // Each known HTLC claims at most one output with its P2WSH script.
    let mut unmatched_htlcs = if channel.is_cooperative_close {
        Vec::new()
    } else {
        channel
            .close_htlcs
            .iter()
            .map(|htlc| (htlc.witness_script.to_p2wsh(), htlc))
            .collect::<Vec<(ScriptBuf, &CloseHtlc)>>()
    };

    for (vout, output) in (0u32..).zip(closing_tx.output.iter()) {
        let outpoint = OutPoint {
            txid: close_txid,
            vout,
        };

        let htlc_idx = unmatched_htlcs
            .iter()
            .position(|(script, _)| *script == output.script_pubkey);
        if let Some(idx) = htlc_idx {
            let (_, htlc) = unmatched_htlcs.remove(idx);
            let resolution = resolve_htlc(htlc, outpoint, spends, params);
            reconciled.close_payments.push(close_payment(
                outpoint,
                output.value.to_sat(),
                htlc.is_outgoing,
                resolution,
            ));
            continue;
        }

        let is_balance = reconciled.close_balance_vout.is_none()
            && channel.close_balance_script.as_ref()
                == Some(&output.script_pubkey);
        if is_balance {
            reconciled.close_balance_vout = Some(vout);
            reconciled.close_balance_spent_by =
                best_spend(outpoint, spends).map(|(tx, _)| tx.id());
        }
    }

    reconciled
}

fn resolve_htlc(
    htlc: &CloseHtlc,
    outpoint: OutPoint,
    spends: &[ChainTransaction],
    params: &ReconcileParams,
) -> Resolution {
    let Some((spend, input)) = best_spend(outpoint, spends) else {
        return Resolution::Pending { spent_by: None };
    };
    let spent_by = spend.id();

    if spend.confirmation_count < params.spend_confirmations {
        return Resolution::Pending {
            spent_by: Some(spent_by),
        };
    }

    match spend_path(htlc, &spend.transaction, input) {
        Some(SpendPath::Success) => Resolution::Paid { spent_by },
        Some(SpendPath::Timeout) => Resolution::Refunded { spent_by },
        None => Resolution::Pending {
            spent_by: Some(spent_by),
        },
    }
}

/// The spend of `outpoint` to trust: the most confirmed, then the lowest
/// txid.
fn best_spend<'a>(
    outpoint: OutPoint,
    spends: &'a [ChainTransaction],
) -> Option<(&'a ChainTransaction, &'a TxIn)> {
    spends
        .iter()
        .filter_map(|tx| {
            tx.transaction
                .input
                .iter()
                .find(|input| input.previous_output == outpoint)
                .map(|input| (tx, input))
        })
        .max_by(|(a, _), (b, _)| {
            a.confirmation_count
                .cmp(&b.confirmation_count)
                .then_with(|| b.id().cmp(&a.id()))
        })
}

/// Inspect the witness of `input` (which spends `htlc`'s output) to see
/// which script branch it took.
fn spend_path(
    htlc: &CloseHtlc,
    tx: &Transaction,
    input: &TxIn,
) -> Option<SpendPath> {
    // P2WSH spends carry the witness script as the last element.
    if input.witness.last() != Some(htlc.witness_script.as_bytes()) {
        return None;
    }

    let reveals_preimage = input
        .witness
        .iter()
        .any(|element| is_preimage(element, &htlc.payment_hash));
    if reveals_preimage {
        return Some(SpendPath::Success);
    }

    let lock_time = tx.lock_time;
    if lock_time.is_block_height() && lock_time.to_consensus_u32() >= htlc.timeout
    {
        return Some(SpendPath::Timeout);
    }

    None
}

fn is_preimage(element: &[u8], payment_hash: &PaymentHash) -> bool {
    element.len() == 32
        && PaymentHash::from(sha256::digest(element)) == *payment_hash
}

fn close_payment(
    outpoint: OutPoint,
    tokens: u64,
    is_outgoing: bool,
    resolution: Resolution,
) -> ClosePayment {
    let (is_paid, is_pending, is_refunded, spent_by) = match resolution {
        Resolution::Pending { spent_by } => (false, true, false, spent_by),
        Resolution::Paid { spent_by } => (true, false, false, Some(spent_by)),
        Resolution::Refunded { spent_by } =>
            (false, false, true, Some(spent_by)),
    };
    ClosePayment {
        transaction_id: outpoint.txid,
        transaction_vout: outpoint.vout,
        tokens,
        is_outgoing,
        is_paid,
        is_pending,
        is_refunded,
        spent_by,
    }
}
