use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness, absolute, hashes::Hash, transaction,
};
use proptest::{
    arbitrary::any,
    collection,
    strategy::{BoxedStrategy, Strategy},
};

/// An `Arbitrary`-like [`Strategy`] for [`Txid`]s.
pub fn any_txid() -> BoxedStrategy<Txid> {
    any::<[u8; 32]>().prop_map(Txid::from_byte_array).boxed()
}

/// An `Arbitrary`-like [`Strategy`] for [`OutPoint`]s.
pub fn any_outpoint() -> BoxedStrategy<OutPoint> {
    (any_txid(), 0u32..8)
        .prop_map(|(txid, vout)| OutPoint { txid, vout })
        .boxed()
}

/// An `Arbitrary`-like [`Strategy`] for [`Witness`]es with a few small
/// stack elements. Some elements are 32 bytes, so preimage-shaped witnesses
/// are common.
pub fn any_witness() -> BoxedStrategy<Witness> {
    let element = proptest::prop_oneof![
        collection::vec(any::<u8>(), 0..=4),
        collection::vec(any::<u8>(), 32),
        collection::vec(any::<u8>(), 64..=72),
    ];
    collection::vec(element, 0..=4)
        .prop_map(|elements| Witness::from_slice(&elements))
        .boxed()
}

/// An `Arbitrary`-like [`Strategy`] for raw [`Transaction`]s spending
/// `inputs` with up to four arbitrary outputs.
pub fn any_tx_spending(inputs: Vec<OutPoint>) -> BoxedStrategy<Transaction> {
    let n_inputs = inputs.len();
    (
        collection::vec(any_witness(), n_inputs),
        collection::vec((0u64..10_000_000, any::<[u8; 32]>()), 1..=4),
        0u32..1_000_000,
    )
        .prop_map(move |(witnesses, outputs, lock_height)| Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::from_consensus(lock_height),
            input: inputs
                .iter()
                .zip(witnesses)
                .map(|(previous_output, witness)| TxIn {
                    previous_output: *previous_output,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
                    witness,
                })
                .collect(),
            output: outputs
                .into_iter()
                .map(|(sats, program)| TxOut {
                    value: Amount::from_sat(sats),
                    script_pubkey: ScriptBuf::new_p2wsh(
                        &bitcoin::WScriptHash::from_byte_array(program),
                    ),
                })
                .collect(),
        })
        .boxed()
}

/// An `Arbitrary`-like [`Strategy`] for raw [`Transaction`]s.
pub fn any_raw_tx() -> BoxedStrategy<Transaction> {
    collection::vec(any_outpoint(), 1..=3)
        .prop_flat_map(any_tx_spending)
        .boxed()
}
