//! Chain state: UTXO set ownership, tip tracking, and block connection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;

use veld_consensus::money::Amount;
use veld_consensus::params::ConsensusParams;
use veld_consensus::rewards::block_subsidy;
use veld_consensus::Hash256;
use veld_primitives::block::Block;
use veld_primitives::encoding::{Decoder, Encoder};
use veld_primitives::outpoint::OutPoint;
use veld_script::flags::MANDATORY_SCRIPT_VERIFY_FLAGS;
use veld_script::sighash::PrecomputedTransactionData;
use veld_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::check_inputs::{check_inputs, InputsError, ScriptCheck};
use crate::checkqueue::{run_script_checks, CheckQueueError};
use crate::scriptcache::ScriptExecutionCache;
use crate::utxo::{Coin, CoinView, UtxoSet};
use crate::validation::{validate_block, ValidationError};

const TIP_KEY: &[u8] = b"tip";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockTip {
    pub height: i32,
    pub hash: Hash256,
}

impl BlockTip {
    fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.height);
        encoder.write_hash_le(&self.hash);
        encoder.into_inner()
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let mut decoder = Decoder::new(bytes);
        let height = decoder
            .read_i32_le()
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let hash = decoder
            .read_hash_le()
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Self { height, hash })
    }
}

#[derive(Debug)]
pub enum ChainStateError {
    Store(StoreError),
    Validation(ValidationError),
    Inputs { tx_index: usize, error: InputsError },
    Script(CheckQueueError),
    MissingInput,
    UnknownParent,
}

impl std::fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainStateError::Store(err) => write!(f, "{err}"),
            ChainStateError::Validation(err) => write!(f, "{err}"),
            ChainStateError::Inputs { tx_index, error } => {
                write!(f, "transaction {tx_index}: {error}")
            }
            ChainStateError::Script(err) => write!(f, "{err}"),
            ChainStateError::MissingInput => write!(f, "missing input"),
            ChainStateError::UnknownParent => write!(f, "block does not extend the current tip"),
        }
    }
}

impl std::error::Error for ChainStateError {}

impl From<StoreError> for ChainStateError {
    fn from(err: StoreError) -> Self {
        ChainStateError::Store(err)
    }
}

impl From<ValidationError> for ChainStateError {
    fn from(err: ValidationError) -> Self {
        ChainStateError::Validation(err)
    }
}

#[derive(Clone, Debug)]
pub struct ConnectedBlock {
    pub height: i32,
    pub hash: Hash256,
    pub txids: Vec<Hash256>,
    pub fees: Amount,
}

pub struct ChainState<S> {
    store: S,
    utxos: UtxoSet<S>,
}

impl<S: KeyValueStore + Clone> ChainState<S> {
    pub fn new(store: S) -> Self {
        let utxos = UtxoSet::new(store.clone());
        Self { store, utxos }
    }
}

impl<S: KeyValueStore> ChainState<S> {
    pub fn best_block(&self) -> Result<Option<BlockTip>, StoreError> {
        match self.store.get(Column::Meta, TIP_KEY)? {
            Some(bytes) => Ok(Some(BlockTip::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        self.utxos.get(outpoint)
    }

    /// Validate `block` against the current tip and apply it.
    ///
    /// Script checks run under the consensus flag set only, collected
    /// across the whole block and executed on the worker pool.
    /// Transactions admitted to the mempool under the policy flag set
    /// hit the script cache here and skip the interpreter. The caller
    /// must hold the node's validation lock: no other thread may mutate
    /// the UTXO set while a block is being connected.
    pub fn connect_block(
        &self,
        block: &Block,
        params: &ConsensusParams,
        cache: &ScriptExecutionCache,
    ) -> Result<ConnectedBlock, ChainStateError> {
        let tip = self.best_block()?;
        let (height, prev_hash) = match &tip {
            Some(tip) => (tip.height + 1, tip.hash),
            None => (0, [0u8; 32]),
        };
        if block.header.prev_block != prev_hash {
            return Err(ChainStateError::UnknownParent);
        }

        let txids = validate_block(block, height)?;

        let txdata_list: Vec<PrecomputedTransactionData> = block
            .transactions
            .iter()
            .map(PrecomputedTransactionData::new)
            .collect();

        let mut batch = WriteBatch::new();
        let mut created: HashMap<OutPoint, Coin> = HashMap::new();
        let mut spent: HashSet<OutPoint> = HashSet::new();
        let mut checks: Vec<ScriptCheck<'_>> = Vec::new();
        let mut total_fees: Amount = 0;

        for (index, tx) in block.transactions.iter().enumerate() {
            if index > 0 {
                let fee = {
                    let view = BlockOverlay {
                        chain: self,
                        created: &created,
                        spent: &spent,
                    };
                    check_inputs(
                        tx,
                        &view,
                        height,
                        MANDATORY_SCRIPT_VERIFY_FLAGS,
                        Some(cache),
                        &txdata_list[index],
                        Some(&mut checks),
                    )
                    .map_err(|error| ChainStateError::Inputs {
                        tx_index: index,
                        error,
                    })?
                };
                total_fees = total_fees
                    .checked_add(fee)
                    .ok_or(ChainStateError::Validation(ValidationError::ValueOutOfRange))?;

                for (input_index, input) in tx.vin.iter().enumerate() {
                    if !spent.insert(input.prevout) {
                        veld_log::log_warn!(
                            "input {} of transaction {} double-spends within block at height {}",
                            input_index,
                            index,
                            height
                        );
                        return Err(ChainStateError::MissingInput);
                    }
                    if created.remove(&input.prevout).is_none() {
                        self.utxos.delete(&mut batch, &input.prevout);
                    }
                }
            }

            for (vout, output) in tx.vout.iter().enumerate() {
                created.insert(
                    OutPoint::new(txids[index], vout as u32),
                    Coin {
                        value: output.value,
                        script_pubkey: output.script_pubkey.clone(),
                        height: height as u32,
                        is_coinbase: index == 0,
                    },
                );
            }
        }

        let coinbase_out: Amount = block.transactions[0]
            .vout
            .iter()
            .fold(0, |acc, output| acc.saturating_add(output.value));
        let allowed = block_subsidy(height, params).saturating_add(total_fees);
        if coinbase_out > allowed {
            return Err(ChainStateError::Validation(ValidationError::InvalidBlock(
                "coinbase pays more than subsidy plus fees",
            )));
        }

        let cancel = AtomicBool::new(false);
        run_script_checks(&checks, &cancel).map_err(ChainStateError::Script)?;
        drop(checks);

        // Whole-transaction cache entries; per-input results are never
        // recorded.
        for txid in txids.iter().skip(1) {
            cache.insert(txid, MANDATORY_SCRIPT_VERIFY_FLAGS);
        }

        for (outpoint, coin) in &created {
            self.utxos.put(&mut batch, outpoint, coin);
        }
        let hash = block.header.hash();
        let new_tip = BlockTip { height, hash };
        batch.put(Column::Meta, TIP_KEY, new_tip.encode());
        self.store.write_batch(&batch)?;

        veld_log::log_info!(
            "connected block at height {} with {} transaction(s)",
            height,
            block.transactions.len()
        );

        Ok(ConnectedBlock {
            height,
            hash,
            txids,
            fees: total_fees,
        })
    }
}

impl<S: KeyValueStore> CoinView for ChainState<S> {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        self.utxos.get(outpoint)
    }

    fn best_block_hash(&self) -> Hash256 {
        self.best_block()
            .ok()
            .flatten()
            .map(|tip| tip.hash)
            .unwrap_or([0u8; 32])
    }
}

/// View of the chain state part-way through connecting a block:
/// outputs created by earlier transactions in the block are spendable,
/// outputs they spent are gone.
struct BlockOverlay<'a, S> {
    chain: &'a ChainState<S>,
    created: &'a HashMap<OutPoint, Coin>,
    spent: &'a HashSet<OutPoint>,
}

impl<'a, S: KeyValueStore> CoinView for BlockOverlay<'a, S> {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        if self.spent.contains(outpoint) {
            return Ok(None);
        }
        if let Some(coin) = self.created.get(outpoint) {
            return Ok(Some(coin.clone()));
        }
        self.chain.coin(outpoint)
    }

    fn best_block_hash(&self) -> Hash256 {
        self.chain.best_block_hash()
    }
}
