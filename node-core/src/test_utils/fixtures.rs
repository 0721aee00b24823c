use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness, absolute,
    hashes::{Hash, ripemd160},
    opcodes::all::{
        OP_CHECKSIG, OP_CLTV, OP_DROP, OP_ELSE, OP_ENDIF, OP_EQUAL,
        OP_EQUALVERIFY, OP_HASH160, OP_IF, OP_SIZE,
    },
    script::{Builder, PushBytesBuf},
    transaction,
};
use common::{
    ln::{
        channel::ChannelId,
        hashes::{PaymentHash, PaymentSecret},
    },
    time::TimestampMs,
};

use super::node_pk;
use crate::{
    client::ChainTransaction,
    close::{CloseHtlc, ClosedChannel},
};

/// A local force close at `height` with our balance at vout 0, an offered
/// HTLC at vout 1, a received HTLC at vout 2, and the partner's balance at
/// vout 3. Both HTLCs carry 100_000 tokens.
pub struct ForceClose {
    pub channel: ClosedChannel,
    pub closing_tx: Transaction,
    pub offered: CloseHtlc,
    pub received: CloseHtlc,
    /// The preimage of the received HTLC, which we know.
    pub received_secret: PaymentSecret,
}

impl ForceClose {
    pub fn new(height: u32) -> Self {
        let funding = OutPoint {
            txid: Txid::from_byte_array([0x11; 32]),
            vout: 0,
        };

        let offered_hash = PaymentSecret::new([0xa1; 32]).compute_hash();
        let offered_timeout = height + 100;
        let offered = CloseHtlc {
            payment_hash: offered_hash,
            is_outgoing: true,
            timeout: offered_timeout,
            witness_script: htlc_witness_script(
                &offered_hash,
                offered_timeout,
                true,
            ),
        };

        let received_secret = PaymentSecret::new([0xb2; 32]);
        let received_hash = received_secret.compute_hash();
        let received_timeout = height + 110;
        let received = CloseHtlc {
            payment_hash: received_hash,
            is_outgoing: false,
            timeout: received_timeout,
            witness_script: htlc_witness_script(
                &received_hash,
                received_timeout,
                false,
            ),
        };

        let output = |sats: u64, script_pubkey: ScriptBuf| TxOut {
            value: Amount::from_sat(sats),
            script_pubkey,
        };
        let closing_tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: funding,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::from_slice(&[vec![0x30; 71], vec![0x30; 71]]),
            }],
            output: vec![
                output(500_000, balance_script(0x01)),
                output(100_000, offered.witness_script.to_p2wsh()),
                output(100_000, received.witness_script.to_p2wsh()),
                output(200_000, balance_script(0x02)),
            ],
        };

        let channel = ClosedChannel {
            id: ChannelId::new(443, 1, 0),
            capacity: 900_000,
            partner_public_key: node_pk(2),
            transaction_id: funding.txid,
            transaction_vout: funding.vout,
            close_transaction_id: Some(closing_tx.compute_txid()),
            close_confirm_height: Some(height),
            is_cooperative_close: false,
            is_local_force_close: true,
            is_remote_force_close: false,
            is_breach_close: false,
            is_funding_cancel: false,
            is_partner_closed: false,
            is_partner_initiated: false,
            final_local_balance: 500_000,
            final_time_locked_balance: 500_000,
            close_balance_vout: None,
            close_balance_spent_by: None,
            close_payments: Vec::new(),
            close_balance_script: Some(balance_script(0x01)),
            close_htlcs: vec![offered.clone(), received.clone()],
        };

        Self {
            channel,
            closing_tx,
            offered,
            received,
            received_secret,
        }
    }

    /// Output `vout` of the closing transaction.
    pub fn outpoint(&self, vout: u32) -> OutPoint {
        OutPoint {
            txid: self.closing_tx.compute_txid(),
            vout,
        }
    }
}

/// A BOLT 3 style HTLC script: the preimage path checks
/// `HASH160(preimage) == RIPEMD160(payment_hash)`, the timeout path checks
/// `timeout` with CLTV. The owner key differs by direction.
pub fn htlc_witness_script(
    payment_hash: &PaymentHash,
    timeout: u32,
    is_outgoing: bool,
) -> ScriptBuf {
    let hash160 = ripemd160::Hash::hash(payment_hash.as_array());
    let owner_key = node_pk(if is_outgoing { 1 } else { 2 }).serialize();

    Builder::new()
        .push_opcode(OP_SIZE)
        .push_int(32)
        .push_opcode(OP_EQUAL)
        .push_opcode(OP_IF)
        .push_opcode(OP_HASH160)
        .push_slice(push_bytes(hash160.as_byte_array()))
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_ELSE)
        .push_int(i64::from(timeout))
        .push_opcode(OP_CLTV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_ENDIF)
        .push_slice(push_bytes(&owner_key))
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

fn push_bytes(bytes: &[u8]) -> PushBytesBuf {
    PushBytesBuf::try_from(bytes.to_vec()).expect("Short push")
}

/// A P2WPKH script with a dummy key hash.
pub fn balance_script(tag: u8) -> ScriptBuf {
    let mut bytes = vec![0x00, 0x14];
    bytes.extend_from_slice(&[tag; 20]);
    ScriptBuf::from_bytes(bytes)
}

/// A transaction spending `outpoint` with `witness`, locked to
/// `lock_height`.
pub fn spend_tx(
    outpoint: OutPoint,
    witness: Vec<Vec<u8>>,
    lock_height: u32,
) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::from_consensus(lock_height),
        input: vec![TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
            witness: Witness::from_slice(&witness),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(90_000),
            script_pubkey: balance_script(0x09),
        }],
    }
}

/// Witness for the preimage path of an HTLC output.
pub fn success_witness(
    secret: &PaymentSecret,
    witness_script: &ScriptBuf,
) -> Vec<Vec<u8>> {
    vec![
        Vec::new(),
        vec![0x30; 71],
        secret.as_array().to_vec(),
        witness_script.to_bytes(),
    ]
}

/// Witness for the timeout path of an HTLC output.
pub fn timeout_witness(witness_script: &ScriptBuf) -> Vec<Vec<u8>> {
    vec![Vec::new(), vec![0x30; 71], Vec::new(), witness_script.to_bytes()]
}

pub fn chain_tx(
    transaction: Transaction,
    confirmation_count: u32,
) -> ChainTransaction {
    ChainTransaction {
        transaction,
        confirmation_count,
        confirmation_height: (confirmation_count > 0)
            .then(|| 1_000 - confirmation_count.min(1_000)),
        block_id: None,
        created_at: Some(TimestampMs::MIN),
    }
}
