//! Structural block/transaction validation.
//!
//! Context-free checks that run before any UTXO resolution or script
//! execution. A transaction that fails here is malformed and is never
//! retried.

use std::collections::HashSet;

use veld_consensus::constants::{
    COINBASE_HEIGHT_COMMITMENT_START, LOCKTIME_THRESHOLD, MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE,
    MAX_TX_SIZE, MIN_BLOCK_VERSION, MIN_TX_VERSION,
};
use veld_consensus::money::MAX_MONEY;
use veld_consensus::Hash256;
use veld_primitives::block::Block;
use veld_primitives::hash::sha256d;
use veld_primitives::outpoint::OutPoint;
use veld_primitives::transaction::Transaction;

#[derive(Debug)]
pub enum ValidationError {
    InvalidBlock(&'static str),
    InvalidTransaction(&'static str),
    ValueOutOfRange,
    DuplicateInput,
    DuplicateTransaction,
    MerkleMismatch,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidBlock(message) => write!(f, "{message}"),
            ValidationError::InvalidTransaction(message) => write!(f, "{message}"),
            ValidationError::ValueOutOfRange => write!(f, "value out of range"),
            ValidationError::DuplicateInput => write!(f, "duplicate input"),
            ValidationError::DuplicateTransaction => write!(f, "duplicate transaction"),
            ValidationError::MerkleMismatch => write!(f, "merkle root mismatch"),
        }
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_transaction(tx: &Transaction, is_coinbase: bool) -> Result<(), ValidationError> {
    if tx.version < MIN_TX_VERSION {
        return Err(ValidationError::InvalidTransaction(
            "transaction version too low",
        ));
    }
    if tx.vin.is_empty() {
        return Err(ValidationError::InvalidTransaction(
            "transaction must have inputs",
        ));
    }
    if tx.vout.is_empty() {
        return Err(ValidationError::InvalidTransaction(
            "transaction must have outputs",
        ));
    }

    let tx_size = tx.consensus_encode().len() as u32;
    if tx_size > MAX_TX_SIZE {
        return Err(ValidationError::InvalidTransaction("transaction too large"));
    }

    let mut value_out = 0i64;
    for output in &tx.vout {
        if output.value < 0 || output.value > MAX_MONEY {
            return Err(ValidationError::ValueOutOfRange);
        }
        value_out = value_out
            .checked_add(output.value)
            .ok_or(ValidationError::ValueOutOfRange)?;
        if value_out > MAX_MONEY {
            return Err(ValidationError::ValueOutOfRange);
        }
    }

    let mut seen_inputs = HashSet::new();
    for input in &tx.vin {
        if !seen_inputs.insert(input.prevout) {
            return Err(ValidationError::DuplicateInput);
        }
    }

    if is_coinbase {
        if tx.vin.len() != 1 || tx.vin[0].prevout != OutPoint::null() {
            return Err(ValidationError::InvalidTransaction(
                "coinbase must have exactly one null input",
            ));
        }
        let script_len = tx.vin[0].script_sig.len();
        if !(2..=100).contains(&script_len) {
            return Err(ValidationError::InvalidTransaction(
                "coinbase scriptSig length out of range",
            ));
        }
    } else if tx.vin.iter().any(|input| input.prevout.is_null()) {
        return Err(ValidationError::InvalidTransaction(
            "non-coinbase cannot contain null prevout",
        ));
    }

    Ok(())
}

/// Structural checks for a whole block. Returns the txids in block
/// order so callers do not hash twice.
pub fn validate_block(block: &Block, height: i32) -> Result<Vec<Hash256>, ValidationError> {
    if block.header.version < MIN_BLOCK_VERSION {
        return Err(ValidationError::InvalidBlock("block version too low"));
    }
    if block.transactions.is_empty() {
        return Err(ValidationError::InvalidBlock(
            "block must contain at least one transaction",
        ));
    }
    let block_size = block.consensus_encode().len() as u32;
    if block_size > MAX_BLOCK_SIZE {
        return Err(ValidationError::InvalidBlock("block size too large"));
    }

    let txids: Vec<Hash256> = block.transactions.iter().map(|tx| tx.txid()).collect();
    validate_merkle_root(block, &txids)?;

    if height > COINBASE_HEIGHT_COMMITMENT_START
        && !coinbase_height_matches(&block.transactions[0], height)
    {
        return Err(ValidationError::InvalidBlock("coinbase height mismatch"));
    }

    let mut seen_txids = HashSet::with_capacity(txids.len());
    for (index, tx) in block.transactions.iter().enumerate() {
        let is_coinbase = index == 0;
        if !is_coinbase && tx.is_coinbase() {
            return Err(ValidationError::InvalidBlock(
                "coinbase in non-first position",
            ));
        }
        let block_time = block.header.time as i64;
        if !is_final_tx(tx, height, block_time) {
            return Err(ValidationError::InvalidTransaction(
                "transaction is not final",
            ));
        }
        validate_transaction(tx, is_coinbase)?;
        if !seen_txids.insert(txids[index]) {
            return Err(ValidationError::DuplicateTransaction);
        }
    }

    let sigops = block_sigops(block);
    if sigops > MAX_BLOCK_SIGOPS {
        return Err(ValidationError::InvalidBlock("block sigops limit exceeded"));
    }

    Ok(txids)
}

fn validate_merkle_root(block: &Block, txids: &[Hash256]) -> Result<(), ValidationError> {
    let (root, mutated) = merkle_root(txids);
    if mutated {
        return Err(ValidationError::DuplicateTransaction);
    }
    if root != block.header.merkle_root {
        return Err(ValidationError::MerkleMismatch);
    }
    Ok(())
}

pub fn is_final_tx(tx: &Transaction, height: i32, block_time: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let lock_time = tx.lock_time as i64;
    let compare = if lock_time < LOCKTIME_THRESHOLD {
        height as i64
    } else {
        block_time
    };
    if lock_time < compare {
        return true;
    }
    tx.vin.iter().all(|input| input.sequence == u32::MAX)
}

pub fn merkle_root(txids: &[Hash256]) -> (Hash256, bool) {
    if txids.is_empty() {
        return ([0u8; 32], false);
    }
    let mut layer = txids.to_vec();
    let mut mutated = false;
    while layer.len() > 1 {
        let size = layer.len();
        let mut next = Vec::with_capacity(size.div_ceil(2));
        let mut i = 0usize;
        while i < size {
            let i2 = if i + 1 < size { i + 1 } else { i };
            if i2 == i + 1 && i2 + 1 == size && layer[i] == layer[i2] {
                mutated = true;
            }
            let mut data = Vec::with_capacity(64);
            data.extend_from_slice(&layer[i]);
            data.extend_from_slice(&layer[i2]);
            next.push(sha256d(&data));
            i += 2;
        }
        layer = next;
    }
    (layer[0], mutated)
}

fn coinbase_height_matches(tx: &Transaction, height: i32) -> bool {
    if tx.vin.is_empty() {
        return false;
    }
    let expected = script_push_int(height as i64);
    tx.vin[0].script_sig.starts_with(&expected)
}

pub fn script_push_int(value: i64) -> Vec<u8> {
    const OP_0: u8 = 0x00;
    const OP_1NEGATE: u8 = 0x4f;
    const OP_1: u8 = 0x51;
    if value == 0 {
        return vec![OP_0];
    }
    if value == -1 {
        return vec![OP_1NEGATE];
    }
    if (1..=16).contains(&value) {
        return vec![OP_1 + (value as u8 - 1)];
    }
    let data = veld_script::interpreter::script_num_to_vec(value);
    let mut script = Vec::with_capacity(data.len() + 1);
    script.push(data.len() as u8);
    script.extend_from_slice(&data);
    script
}

fn block_sigops(block: &Block) -> u32 {
    block
        .transactions
        .iter()
        .map(|tx| {
            let input_ops: u32 = tx
                .vin
                .iter()
                .map(|input| legacy_sigops(&input.script_sig))
                .sum();
            let output_ops: u32 = tx
                .vout
                .iter()
                .map(|output| legacy_sigops(&output.script_pubkey))
                .sum();
            input_ops + output_ops
        })
        .sum()
}

fn legacy_sigops(script: &[u8]) -> u32 {
    const OP_CHECKSIG: u8 = 0xac;
    const OP_CHECKSIGVERIFY: u8 = 0xad;
    const OP_CHECKMULTISIG: u8 = 0xae;
    const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
    const OP_PUSHDATA1: u8 = 0x4c;
    const OP_PUSHDATA2: u8 = 0x4d;
    const OP_PUSHDATA4: u8 = 0x4e;

    let mut count = 0u32;
    let mut cursor = 0usize;
    while cursor < script.len() {
        let opcode = script[cursor];
        cursor += 1;
        match opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => count += 20,
            0x01..=0x4b => {
                let len = opcode as usize;
                if cursor + len > script.len() {
                    break;
                }
                cursor += len;
            }
            OP_PUSHDATA1 => {
                if cursor >= script.len() {
                    break;
                }
                let len = script[cursor] as usize;
                cursor += 1;
                if cursor + len > script.len() {
                    break;
                }
                cursor += len;
            }
            OP_PUSHDATA2 => {
                if cursor + 2 > script.len() {
                    break;
                }
                let len = u16::from_le_bytes([script[cursor], script[cursor + 1]]) as usize;
                cursor += 2;
                if cursor + len > script.len() {
                    break;
                }
                cursor += len;
            }
            OP_PUSHDATA4 => {
                if cursor + 4 > script.len() {
                    break;
                }
                let len = u32::from_le_bytes([
                    script[cursor],
                    script[cursor + 1],
                    script[cursor + 2],
                    script[cursor + 3],
                ]) as usize;
                cursor += 4;
                if cursor + len > script.len() {
                    break;
                }
                cursor += len;
            }
            _ => {}
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use veld_primitives::transaction::{TxIn, TxOut};

    fn hash(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn merkle_mutation_only_on_last_pair() {
        let txids = vec![hash(1), hash(1), hash(2), hash(3)];
        let (_, mutated) = merkle_root(&txids);
        assert!(!mutated, "non-terminal duplicate should not mark mutation");
    }

    #[test]
    fn merkle_mutation_detects_terminal_pair() {
        let txids = vec![hash(1), hash(2), hash(3), hash(3)];
        let (_, mutated) = merkle_root(&txids);
        assert!(mutated, "terminal duplicate should mark mutation");
    }

    #[test]
    fn merkle_mutation_ignores_odd_duplication() {
        let txids = vec![hash(1), hash(2), hash(3)];
        let (_, mutated) = merkle_root(&txids);
        assert!(!mutated, "odd-length duplication should not mark mutation");
    }

    #[test]
    fn duplicate_inputs_rejected() {
        let prevout = OutPoint::new(hash(9), 1);
        let tx = Transaction {
            version: 1,
            vin: vec![
                TxIn::new(prevout, Vec::new()),
                TxIn::new(prevout, Vec::new()),
            ],
            vout: vec![TxOut {
                value: 1,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        };
        assert!(matches!(
            validate_transaction(&tx, false),
            Err(ValidationError::DuplicateInput)
        ));
    }

    #[test]
    fn empty_transactions_rejected() {
        let tx = Transaction {
            version: 1,
            vin: Vec::new(),
            vout: Vec::new(),
            lock_time: 0,
        };
        assert!(validate_transaction(&tx, false).is_err());
    }
}
