//! Signature hashing for transparent inputs.
//!
//! Two digest algorithms coexist. The legacy algorithm double-SHA256s a
//! per-input modified serialization of the whole transaction. The
//! fork-id algorithm commits to fixed midstates over the prevouts,
//! sequences, and outputs, which a [`PrecomputedTransactionData`] can
//! supply so signing cost stays linear in the number of inputs. The
//! fork value is mixed into the BLAKE2b personalization; replay
//! protection substitutes a different value, invalidating every
//! signature made under the old one.

use blake2b_simd::Params as Blake2bParams;
use veld_consensus::{Amount, Hash256};
use veld_primitives::encoding::{Encodable, Encoder};
use veld_primitives::hash::sha256d;
use veld_primitives::transaction::{Transaction, TxOut};

use crate::flags::{ScriptFlags, SCRIPT_ENABLE_REPLAY_PROTECTION};

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_FORKID: u32 = 0x40;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Fork value committed by every fork-id signature hash.
pub const SIGHASH_FORK_VALUE: u32 = 0;
/// Fork value used once replay protection activates.
pub const REPLAY_PROTECTION_FORK_VALUE: u32 = 0x00ff_0000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SighashType(pub u32);

impl SighashType {
    pub fn base_type(self) -> u32 {
        self.0 & 0x1f
    }

    pub fn has_fork_id(self) -> bool {
        (self.0 & SIGHASH_FORKID) != 0
    }

    pub fn has_anyone_can_pay(self) -> bool {
        (self.0 & SIGHASH_ANYONECANPAY) != 0
    }
}

#[derive(Debug)]
pub enum SighashError {
    InputIndexOutOfRange,
    MissingOutput,
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange => write!(f, "input index out of range"),
            SighashError::MissingOutput => write!(f, "no matching output for SIGHASH_SINGLE"),
        }
    }
}

impl std::error::Error for SighashError {}

const PREVOUTS_HASH_PERSONALIZATION: [u8; 16] = *b"VeldPrevoutsHash";
const SEQUENCE_HASH_PERSONALIZATION: [u8; 16] = *b"VeldSequenceHash";
const OUTPUTS_HASH_PERSONALIZATION: [u8; 16] = *b"VeldOutputsHash.";

pub fn fork_value(flags: ScriptFlags) -> u32 {
    if (flags & SCRIPT_ENABLE_REPLAY_PROTECTION) != 0 {
        REPLAY_PROTECTION_FORK_VALUE
    } else {
        SIGHASH_FORK_VALUE
    }
}

/// Per-transaction values shared by every input's signature check.
///
/// Built once before any input is checked and never mutated afterwards.
/// The midstates depend on all outputs and on input metadata but not on
/// any unlocking script, so one instance serves every input. Instances
/// are never reused across distinct transactions, even byte-identical
/// ones.
#[derive(Clone, Debug)]
pub struct PrecomputedTransactionData {
    txid: Hash256,
    hash_prevouts: Hash256,
    hash_sequence: Hash256,
    hash_outputs: Hash256,
    value_out: Amount,
}

impl PrecomputedTransactionData {
    pub fn new(tx: &Transaction) -> Self {
        let value_out = tx
            .vout
            .iter()
            .fold(0i64, |acc, output| acc.saturating_add(output.value));
        Self {
            txid: tx.txid(),
            hash_prevouts: hash_prevouts(tx),
            hash_sequence: hash_sequence(tx),
            hash_outputs: hash_outputs_all(tx),
            value_out,
        }
    }

    pub fn txid(&self) -> &Hash256 {
        &self.txid
    }

    /// Sum of declared output values, saturating at `i64::MAX`; callers
    /// range-check it against MAX_MONEY.
    pub fn value_out(&self) -> Amount {
        self.value_out
    }
}

pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    amount: Amount,
    sighash_type: SighashType,
    fork_value: u32,
    use_fork_id: bool,
    txdata: Option<&PrecomputedTransactionData>,
) -> Result<Hash256, SighashError> {
    if input_index >= tx.vin.len() {
        return Err(SighashError::InputIndexOutOfRange);
    }
    if use_fork_id && sighash_type.has_fork_id() {
        Ok(signature_hash_fork_id(
            tx,
            input_index,
            script_code,
            amount,
            sighash_type,
            fork_value,
            txdata,
        ))
    } else {
        signature_hash_legacy(tx, input_index, script_code, sighash_type)
    }
}

fn signature_hash_fork_id(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    amount: Amount,
    sighash_type: SighashType,
    fork_value: u32,
    txdata: Option<&PrecomputedTransactionData>,
) -> Hash256 {
    let anyone_can_pay = sighash_type.has_anyone_can_pay();
    let base = sighash_type.base_type();

    let prevouts_digest = if anyone_can_pay {
        [0u8; 32]
    } else {
        match txdata {
            Some(data) => data.hash_prevouts,
            None => hash_prevouts(tx),
        }
    };

    let sequence_digest = if anyone_can_pay || base == SIGHASH_SINGLE || base == SIGHASH_NONE {
        [0u8; 32]
    } else {
        match txdata {
            Some(data) => data.hash_sequence,
            None => hash_sequence(tx),
        }
    };

    let outputs_digest = if base != SIGHASH_SINGLE && base != SIGHASH_NONE {
        match txdata {
            Some(data) => data.hash_outputs,
            None => hash_outputs_all(tx),
        }
    } else if base == SIGHASH_SINGLE && input_index < tx.vout.len() {
        hash_outputs_single(&tx.vout[input_index])
    } else {
        [0u8; 32]
    };

    let mut personalization = [0u8; 16];
    personalization[..12].copy_from_slice(b"VeldSigHash.");
    personalization[12..].copy_from_slice(&fork_value.to_le_bytes());

    let input = &tx.vin[input_index];
    let mut encoder = Encoder::new();
    encoder.write_i32_le(tx.version);
    encoder.write_bytes(&prevouts_digest);
    encoder.write_bytes(&sequence_digest);
    input.prevout.consensus_encode(&mut encoder);
    encoder.write_var_bytes(script_code);
    encoder.write_i64_le(amount);
    encoder.write_u32_le(input.sequence);
    encoder.write_bytes(&outputs_digest);
    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);

    blake2b_hash(personalization, &encoder.into_inner())
}

fn signature_hash_legacy(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Result<Hash256, SighashError> {
    let anyone_can_pay = sighash_type.has_anyone_can_pay();
    let hash_single = sighash_type.base_type() == SIGHASH_SINGLE;
    let hash_none = sighash_type.base_type() == SIGHASH_NONE;

    if hash_single && input_index >= tx.vout.len() {
        return Err(SighashError::MissingOutput);
    }

    let mut encoder = Encoder::new();
    encoder.write_i32_le(tx.version);

    let input_count = if anyone_can_pay { 1 } else { tx.vin.len() };
    encoder.write_varint(input_count as u64);
    for idx in 0..input_count {
        let actual_index = if anyone_can_pay { input_index } else { idx };
        let input = &tx.vin[actual_index];
        input.prevout.consensus_encode(&mut encoder);
        let is_signing = actual_index == input_index;
        if is_signing {
            encoder.write_var_bytes(script_code);
        } else {
            encoder.write_varint(0);
        }
        if !is_signing && (hash_single || hash_none) {
            encoder.write_u32_le(0);
        } else {
            encoder.write_u32_le(input.sequence);
        }
    }

    let output_count = if hash_none {
        0
    } else if hash_single {
        input_index + 1
    } else {
        tx.vout.len()
    };
    encoder.write_varint(output_count as u64);
    for idx in 0..output_count {
        if hash_single && idx != input_index {
            encoder.write_i64_le(-1);
            encoder.write_varint(0);
        } else {
            tx.vout[idx].consensus_encode(&mut encoder);
        }
    }

    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);

    Ok(sha256d(&encoder.into_inner()))
}

fn blake2b_hash(personalization: [u8; 16], data: &[u8]) -> Hash256 {
    let mut state = Blake2bParams::new()
        .hash_length(32)
        .personal(&personalization)
        .to_state();
    state.update(data);
    let hash = state.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_bytes());
    out
}

fn hash_prevouts(tx: &Transaction) -> Hash256 {
    let mut encoder = Encoder::new();
    for input in &tx.vin {
        input.prevout.consensus_encode(&mut encoder);
    }
    blake2b_hash(PREVOUTS_HASH_PERSONALIZATION, &encoder.into_inner())
}

fn hash_sequence(tx: &Transaction) -> Hash256 {
    let mut encoder = Encoder::new();
    for input in &tx.vin {
        encoder.write_u32_le(input.sequence);
    }
    blake2b_hash(SEQUENCE_HASH_PERSONALIZATION, &encoder.into_inner())
}

fn hash_outputs_all(tx: &Transaction) -> Hash256 {
    let mut encoder = Encoder::new();
    for output in &tx.vout {
        output.consensus_encode(&mut encoder);
    }
    blake2b_hash(OUTPUTS_HASH_PERSONALIZATION, &encoder.into_inner())
}

fn hash_outputs_single(output: &TxOut) -> Hash256 {
    let mut encoder = Encoder::new();
    output.consensus_encode(&mut encoder);
    blake2b_hash(OUTPUTS_HASH_PERSONALIZATION, &encoder.into_inner())
}
