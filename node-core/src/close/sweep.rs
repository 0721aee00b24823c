use std::collections::HashSet;

use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use common::{serde_helpers::consensus_hex_tx, time::TimestampMs};
use serde::{Deserialize, Serialize};

use super::ClosedChannel;
use crate::client::ChainTransaction;

/// A chain transaction which spends at least one closing transaction output.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SweepTransaction {
    pub id: Txid,
    /// Total output value.
    pub tokens: u64,
    /// The closing transaction outputs this transaction spends.
    pub spends: Vec<OutPoint>,
    pub confirmation_count: u32,
    pub confirmation_height: Option<u32>,
    pub is_confirmed: bool,
    pub block_id: Option<BlockHash>,
    pub created_at: Option<TimestampMs>,
    #[serde(with = "consensus_hex_tx")]
    pub transaction: Transaction,
}

/// Every transaction in `txs` which spends an output of one of `channels`'
/// closing transactions, in the order given.
pub fn find_sweeps(
    channels: &[ClosedChannel],
    txs: &[ChainTransaction],
) -> Vec<SweepTransaction> {
    let closing_txids = channels
        .iter()
        .filter_map(|channel| channel.close_transaction_id)
        .collect::<HashSet<Txid>>();

    txs.iter()
        .filter_map(|tx| {
            let spends = tx
                .transaction
                .input
                .iter()
                .map(|input| input.previous_output)
                .filter(|outpoint| closing_txids.contains(&outpoint.txid))
                .collect::<Vec<_>>();
            if spends.is_empty() {
                return None;
            }
            Some(SweepTransaction {
                id: tx.id(),
                tokens: tx
                    .transaction
                    .output
                    .iter()
                    .map(|output| output.value.to_sat())
                    .sum(),
                spends,
                confirmation_count: tx.confirmation_count,
                confirmation_height: tx.confirmation_height,
                is_confirmed: tx.is_confirmed(),
                block_id: tx.block_id,
                created_at: tx.created_at,
                transaction: tx.transaction.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use common::test_utils::arbitrary::any_raw_tx;
    use proptest::{prop_assert, prop_assert_eq, proptest};

    use super::*;
    use crate::test_utils::fixtures::{
        ForceClose, chain_tx, spend_tx, timeout_witness,
    };

    #[test]
    fn finds_spends_of_closing_outputs() {
        let close = ForceClose::new(500);
        let mut channel = close.channel.clone();
        channel.close_transaction_id = Some(close.closing_tx.compute_txid());

        let balance_sweep =
            spend_tx(close.outpoint(0), vec![vec![1; 71]], 0);
        let refund = spend_tx(
            close.outpoint(1),
            timeout_witness(&close.offered.witness_script),
            close.offered.timeout,
        );
        let txs = [
            chain_tx(close.closing_tx.clone(), 3),
            chain_tx(balance_sweep.clone(), 2),
            chain_tx(refund.clone(), 0),
        ];

        let sweeps = find_sweeps(&[channel], &txs);
        assert_eq!(sweeps.len(), 2);

        assert_eq!(sweeps[0].id, balance_sweep.compute_txid());
        assert_eq!(sweeps[0].spends, vec![close.outpoint(0)]);
        assert!(sweeps[0].is_confirmed);
        assert_eq!(sweeps[0].confirmation_count, 2);

        assert_eq!(sweeps[1].id, refund.compute_txid());
        assert_eq!(sweeps[1].spends, vec![close.outpoint(1)]);
        assert!(!sweeps[1].is_confirmed);
        assert_eq!(sweeps[1].confirmation_height, None);
        assert_eq!(
            sweeps[1].tokens,
            refund.output.iter().map(|o| o.value.to_sat()).sum::<u64>()
        );
    }

    #[test]
    fn channels_without_closing_tx_have_no_sweeps() {
        let close = ForceClose::new(500);
        let mut channel = close.channel.clone();
        channel.close_transaction_id = None;

        let sweep = spend_tx(close.outpoint(0), vec![vec![1; 71]], 0);
        let sweeps = find_sweeps(&[channel], &[chain_tx(sweep, 1)]);
        assert!(sweeps.is_empty());
    }

    #[test]
    fn unrelated_txs_are_never_sweeps() {
        let close = ForceClose::new(500);
        let mut channel = close.channel.clone();
        channel.close_transaction_id = Some(close.closing_tx.compute_txid());
        let channels = [channel];

        proptest!(|(tx in any_raw_tx())| {
            let sweeps = find_sweeps(&channels, &[chain_tx(tx.clone(), 1)]);
            let spends_close = tx.input.iter().any(|input| {
                Some(input.previous_output.txid)
                    == channels[0].close_transaction_id
            });
            prop_assert_eq!(sweeps.len(), usize::from(spends_close));
            prop_assert!(sweeps.iter().all(|s| s.id == tx.compute_txid()));
        });
    }

    #[test]
    fn sweep_json_roundtrip() {
        let close = ForceClose::new(500);
        let mut channel = close.channel.clone();
        channel.close_transaction_id = Some(close.closing_tx.compute_txid());
        let sweep = spend_tx(close.outpoint(0), vec![vec![1; 71]], 0);
        let sweeps = find_sweeps(&[channel], &[chain_tx(sweep, 1)]);

        let json = serde_json::to_string(&sweeps[0]).unwrap();
        let sweep2 = serde_json::from_str::<SweepTransaction>(&json).unwrap();
        assert_eq!(sweeps[0], sweep2);
    }
}
