//! Transaction input validation.
//!
//! `check_inputs` is the orchestrator both mempool admission and block
//! connection go through: it resolves every input's coin, enforces
//! amounts and coinbase maturity, consults the script execution cache,
//! and either runs each input's script check inline or hands the checks
//! back to the caller for parallel execution.

use veld_consensus::constants::COINBASE_MATURITY;
use veld_consensus::money::{money_range, Amount};
use veld_consensus::Hash256;
use veld_primitives::outpoint::OutPoint;
use veld_primitives::transaction::Transaction;
use veld_script::flags::{ScriptFlags, MANDATORY_SCRIPT_VERIFY_FLAGS};
use veld_script::interpreter::{verify_script, ScriptError};
use veld_script::sighash::PrecomputedTransactionData;
use veld_storage::StoreError;

use crate::scriptcache::ScriptExecutionCache;
use crate::utxo::{Coin, CoinView};

#[derive(Debug)]
pub enum InputsError {
    MissingOrSpentInput {
        input_index: usize,
        prevout: OutPoint,
    },
    PrematureCoinbaseSpend {
        input_index: usize,
        depth: i64,
    },
    ValueOutOfRange,
    InsufficientInputValue {
        value_in: Amount,
        value_out: Amount,
    },
    Script {
        input_index: usize,
        error: ScriptError,
        /// True when the input also fails under the mandatory flag set,
        /// i.e. every conforming node must reject this transaction. A
        /// false value marks a local-policy rejection that a peer with
        /// different relay rules may still accept.
        mandatory: bool,
    },
    Store(StoreError),
}

impl InputsError {
    pub fn is_policy_only(&self) -> bool {
        matches!(
            self,
            InputsError::Script {
                mandatory: false,
                ..
            }
        )
    }
}

impl std::fmt::Display for InputsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputsError::MissingOrSpentInput {
                input_index,
                prevout,
            } => write!(
                f,
                "input {input_index} spends missing or spent output {}:{}",
                hex32(&prevout.txid),
                prevout.vout
            ),
            InputsError::PrematureCoinbaseSpend { input_index, depth } => write!(
                f,
                "input {input_index} spends coinbase at depth {depth} (need {COINBASE_MATURITY})"
            ),
            InputsError::ValueOutOfRange => write!(f, "input value out of range"),
            InputsError::InsufficientInputValue {
                value_in,
                value_out,
            } => write!(f, "input value {value_in} below output value {value_out}"),
            InputsError::Script {
                input_index,
                error,
                mandatory,
            } => {
                let kind = if *mandatory { "mandatory" } else { "policy" };
                write!(f, "input {input_index} failed {kind} script check: {error}")
            }
            InputsError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for InputsError {}

impl From<StoreError> for InputsError {
    fn from(err: StoreError) -> Self {
        InputsError::Store(err)
    }
}

/// One input's script check, self-contained and free of shared mutable
/// state: it reads only the referenced coin's locking script, the
/// transaction, and the shared precomputed data, so any number of
/// checks may run on any thread.
pub struct ScriptCheck<'a> {
    tx: &'a Transaction,
    input_index: usize,
    script_pubkey: Vec<u8>,
    amount: Amount,
    flags: ScriptFlags,
    txdata: &'a PrecomputedTransactionData,
}

impl<'a> ScriptCheck<'a> {
    fn new(
        tx: &'a Transaction,
        input_index: usize,
        coin: &Coin,
        flags: ScriptFlags,
        txdata: &'a PrecomputedTransactionData,
    ) -> Self {
        Self {
            tx,
            input_index,
            script_pubkey: coin.script_pubkey.clone(),
            amount: coin.value,
            flags,
            txdata,
        }
    }

    pub fn input_index(&self) -> usize {
        self.input_index
    }

    pub fn txid(&self) -> &Hash256 {
        self.txdata.txid()
    }

    pub fn flags(&self) -> ScriptFlags {
        self.flags
    }

    pub fn execute(&self) -> Result<(), ScriptError> {
        verify_script(
            &self.tx.vin[self.input_index].script_sig,
            &self.script_pubkey,
            self.tx,
            self.input_index,
            self.amount,
            self.flags,
            Some(self.txdata),
        )
    }
}

/// Validate every input of `tx` against `view` under `flags`.
///
/// On success returns the transaction fee (input value minus output
/// value). With `deferred` supplied, script checks are returned
/// unevaluated instead of run, one per input, so the caller can spread
/// them over a worker pool; the caller is then also responsible for
/// recording the transaction in the cache once all checks pass.
///
/// The caller must hold whatever synchronization keeps `view` stable
/// for the duration of the call, and `tx` must not be a coinbase.
pub fn check_inputs<'a, V: CoinView>(
    tx: &'a Transaction,
    view: &V,
    spend_height: i32,
    flags: ScriptFlags,
    cache: Option<&ScriptExecutionCache>,
    txdata: &'a PrecomputedTransactionData,
    mut deferred: Option<&mut Vec<ScriptCheck<'a>>>,
) -> Result<Amount, InputsError> {
    assert!(
        !tx.is_coinbase(),
        "check_inputs is not defined for coinbase transactions"
    );
    debug_assert_eq!(
        *txdata.txid(),
        tx.txid(),
        "precomputed data built from a different transaction"
    );

    let mut coins = Vec::with_capacity(tx.vin.len());
    let mut value_in: Amount = 0;
    for (input_index, input) in tx.vin.iter().enumerate() {
        let coin = view
            .coin(&input.prevout)?
            .ok_or(InputsError::MissingOrSpentInput {
                input_index,
                prevout: input.prevout,
            })?;
        if coin.is_coinbase {
            let depth = i64::from(spend_height) - i64::from(coin.height);
            if depth < COINBASE_MATURITY as i64 {
                return Err(InputsError::PrematureCoinbaseSpend { input_index, depth });
            }
        }
        if !money_range(coin.value) {
            return Err(InputsError::ValueOutOfRange);
        }
        value_in = value_in
            .checked_add(coin.value)
            .ok_or(InputsError::ValueOutOfRange)?;
        if !money_range(value_in) {
            return Err(InputsError::ValueOutOfRange);
        }
        coins.push(coin);
    }

    let value_out = txdata.value_out();
    if !money_range(value_out) {
        return Err(InputsError::ValueOutOfRange);
    }
    if value_in < value_out {
        return Err(InputsError::InsufficientInputValue {
            value_in,
            value_out,
        });
    }
    let fee = value_in - value_out;

    let txid = txdata.txid();
    if let Some(cache) = cache {
        if cache.contains(txid, flags) {
            veld_log::log_trace!("script cache hit for {}", hex32(txid));
            return Ok(fee);
        }
    }

    for (input_index, coin) in coins.iter().enumerate() {
        let check = ScriptCheck::new(tx, input_index, coin, flags, txdata);
        if let Some(list) = deferred.as_deref_mut() {
            list.push(check);
            continue;
        }
        if let Err(error) = check.execute() {
            // Work out whether the failure is consensus-critical by
            // re-running the input under the mandatory flags alone.
            let mandatory_flags = flags & MANDATORY_SCRIPT_VERIFY_FLAGS;
            if mandatory_flags != flags {
                let relaxed = ScriptCheck::new(tx, input_index, coin, mandatory_flags, txdata);
                if relaxed.execute().is_ok() {
                    return Err(InputsError::Script {
                        input_index,
                        error,
                        mandatory: false,
                    });
                }
            }
            return Err(InputsError::Script {
                input_index,
                error,
                mandatory: true,
            });
        }
    }

    if deferred.is_none() {
        if let Some(cache) = cache {
            cache.insert(txid, flags);
        }
    }

    Ok(fee)
}

fn hex32(hash: &Hash256) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(64);
    for byte in hash {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
