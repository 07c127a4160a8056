//! Mempool admission built on the input validation engine.

use std::time::{SystemTime, UNIX_EPOCH};

use veld_chainstate::check_inputs::{check_inputs, InputsError};
use veld_chainstate::scriptcache::ScriptExecutionCache;
use veld_chainstate::state::ChainState;
use veld_chainstate::utxo::{Coin, CoinView};
use veld_chainstate::validation::{is_final_tx, validate_transaction};
use veld_consensus::Hash256;
use veld_primitives::outpoint::OutPoint;
use veld_primitives::transaction::Transaction;
use veld_script::flags::{MANDATORY_SCRIPT_VERIFY_FLAGS, STANDARD_SCRIPT_VERIFY_FLAGS};
use veld_script::interpreter::is_push_only;
use veld_script::sighash::PrecomputedTransactionData;
use veld_script::standard::{classify_script_pubkey, ScriptType};
use veld_storage::{KeyValueStore, StoreError};

use crate::policy::MempoolPolicy;
use crate::pool::{Mempool, MempoolEntry, MempoolError, MempoolErrorKind};

/// Creation height recorded for coins that only exist in the mempool.
pub const MEMPOOL_HEIGHT: u32 = 0x7fff_ffff;

/// Coin view layering unconfirmed mempool outputs over the confirmed
/// chain state, so a transaction may spend an unconfirmed parent.
pub struct MempoolView<'a, V> {
    chain: &'a V,
    pool: &'a Mempool,
}

impl<'a, V> MempoolView<'a, V> {
    pub fn new(chain: &'a V, pool: &'a Mempool) -> Self {
        Self { chain, pool }
    }
}

impl<'a, V: CoinView> CoinView for MempoolView<'a, V> {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        if let Some(coin) = self.chain.coin(outpoint)? {
            return Ok(Some(coin));
        }
        Ok(self.pool.prevout(outpoint).map(|prevout| Coin {
            value: prevout.value,
            script_pubkey: prevout.script_pubkey,
            height: MEMPOOL_HEIGHT,
            is_coinbase: false,
        }))
    }

    fn best_block_hash(&self) -> Hash256 {
        self.chain.best_block_hash()
    }
}

/// Admit `tx` to the mempool, or explain why not.
///
/// Scripts run under the standard (consensus plus policy) flag set with
/// the cache enabled. On success the transaction is additionally
/// recorded in the cache under the mandatory set: the standard set
/// covers it (asserted at compile time in `veld_script::flags`) and
/// every flag tightens monotonically, so validity transfers, and block
/// connection later hits that entry without re-running a single script.
///
/// The caller holds exclusive access to both the chain state and the
/// pool for the duration of the call.
pub fn accept_to_mempool<S: KeyValueStore>(
    chain: &ChainState<S>,
    mempool: &mut Mempool,
    policy: &MempoolPolicy,
    cache: &ScriptExecutionCache,
    tx: Transaction,
) -> Result<Hash256, MempoolError> {
    let txid = tx.txid();
    if mempool.contains(&txid) {
        return Err(MempoolError::new(
            MempoolErrorKind::AlreadyInMempool,
            "transaction already in mempool",
        ));
    }
    if tx.is_coinbase() {
        return Err(MempoolError::new(
            MempoolErrorKind::InvalidTransaction,
            "coinbase cannot be relayed",
        ));
    }
    validate_transaction(&tx, false)
        .map_err(|err| MempoolError::new(MempoolErrorKind::InvalidTransaction, err.to_string()))?;

    let best = chain
        .best_block()
        .map_err(|err| MempoolError::new(MempoolErrorKind::Internal, err.to_string()))?;
    let next_height = best.map(|tip| tip.height + 1).unwrap_or(0);
    let now = now_secs();
    if !is_final_tx(&tx, next_height, now as i64) {
        return Err(MempoolError::new(
            MempoolErrorKind::InvalidTransaction,
            "transaction is not final",
        ));
    }

    // Conflict detection runs before any coin resolution or script
    // work: no two pool-resident transactions may spend the same
    // output.
    for input in &tx.vin {
        if let Some(conflict) = mempool.spender(&input.prevout) {
            return Err(MempoolError::new(
                MempoolErrorKind::Conflict,
                format!("input already spent by mempool transaction {}", hex32(&conflict)),
            ));
        }
    }

    if policy.require_standard {
        enforce_standard(&tx, policy)?;
    }

    let txdata = PrecomputedTransactionData::new(&tx);
    let fee = {
        let view = MempoolView::new(chain, mempool);
        check_inputs(
            &tx,
            &view,
            next_height,
            STANDARD_SCRIPT_VERIFY_FLAGS,
            Some(cache),
            &txdata,
            None,
        )
        .map_err(map_inputs_error)?
    };

    let size = tx.consensus_encode().len();
    if fee < policy.min_relay_fee_for_size(size) {
        return Err(MempoolError::new(
            MempoolErrorKind::InsufficientFee,
            "insufficient fee",
        ));
    }

    cache.insert(&txid, MANDATORY_SCRIPT_VERIFY_FLAGS);

    let mut parents: Vec<Hash256> = tx
        .vin
        .iter()
        .filter(|input| mempool.contains(&input.prevout.txid))
        .map(|input| input.prevout.txid)
        .collect();
    parents.sort();
    parents.dedup();
    let spent_outpoints: Vec<OutPoint> = tx.vin.iter().map(|input| input.prevout).collect();

    mempool.insert(MempoolEntry {
        txid,
        tx,
        time: now,
        height: next_height,
        fee,
        size,
        spent_outpoints,
        parents,
    })?;

    veld_log::log_debug!("accepted {} to mempool (fee {})", hex32(&txid), fee);
    Ok(txid)
}

fn enforce_standard(tx: &Transaction, policy: &MempoolPolicy) -> Result<(), MempoolError> {
    for input in &tx.vin {
        if input.script_sig.len() > policy.max_scriptsig_size {
            return Err(MempoolError::new(
                MempoolErrorKind::NonStandard,
                "scriptsig-size",
            ));
        }
        if !is_push_only(&input.script_sig) {
            return Err(MempoolError::new(
                MempoolErrorKind::NonStandard,
                "scriptsig-not-pushonly",
            ));
        }
    }
    for output in &tx.vout {
        match classify_script_pubkey(&output.script_pubkey) {
            ScriptType::NonStandard => {
                return Err(MempoolError::new(
                    MempoolErrorKind::NonStandard,
                    "scriptpubkey",
                ));
            }
            ScriptType::OpReturn => {
                if output.script_pubkey.len() > policy.max_op_return_bytes + 3 {
                    return Err(MempoolError::new(
                        MempoolErrorKind::NonStandard,
                        "oversize-op-return",
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn map_inputs_error(err: InputsError) -> MempoolError {
    match err {
        InputsError::MissingOrSpentInput { prevout, .. } => {
            MempoolError::missing_inputs(vec![prevout])
        }
        InputsError::Script {
            mandatory: false, ..
        } => MempoolError::new(MempoolErrorKind::NonStandard, err.to_string()),
        InputsError::Script { .. } => {
            MempoolError::new(MempoolErrorKind::InvalidScript, err.to_string())
        }
        InputsError::Store(inner) => {
            MempoolError::new(MempoolErrorKind::Internal, inner.to_string())
        }
        other => MempoolError::new(MempoolErrorKind::InvalidTransaction, other.to_string()),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn hex32(hash: &Hash256) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(64);
    for byte in hash {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
