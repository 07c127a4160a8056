//! Parallel execution of deferred script checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;
use veld_consensus::Hash256;
use veld_script::interpreter::ScriptError;

use crate::check_inputs::ScriptCheck;

#[derive(Debug)]
pub enum CheckQueueError {
    Failed {
        txid: Hash256,
        input_index: usize,
        error: ScriptError,
    },
    Cancelled,
}

impl std::fmt::Display for CheckQueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckQueueError::Failed {
                input_index, error, ..
            } => write!(f, "script check failed on input {input_index}: {error}"),
            CheckQueueError::Cancelled => write!(f, "script checks abandoned"),
        }
    }
}

impl std::error::Error for CheckQueueError {}

/// Run every deferred check across the rayon pool.
///
/// The checks are independent, so they execute in any order on any
/// number of workers. A single failure invalidates the whole batch:
/// the shared `cancel` flag is raised so outstanding checks return
/// without running the interpreter. Cancellation is cooperative only;
/// results computed after the flag rises are discarded, never wrong.
/// Callers abandoning the batch (e.g. a competing block won) may raise
/// `cancel` themselves and will get `Cancelled` back.
pub fn run_script_checks(
    checks: &[ScriptCheck<'_>],
    cancel: &AtomicBool,
) -> Result<(), CheckQueueError> {
    let failure: Mutex<Option<CheckQueueError>> = Mutex::new(None);

    checks.par_iter().for_each(|check| {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        if let Err(error) = check.execute() {
            cancel.store(true, Ordering::Relaxed);
            let mut slot = failure.lock().expect("check queue failure lock");
            if slot.is_none() {
                *slot = Some(CheckQueueError::Failed {
                    txid: *check.txid(),
                    input_index: check.input_index(),
                    error,
                });
            }
        }
    });

    if let Some(failure) = failure.into_inner().expect("check queue failure lock") {
        return Err(failure);
    }
    if cancel.load(Ordering::Relaxed) {
        return Err(CheckQueueError::Cancelled);
    }
    Ok(())
}
