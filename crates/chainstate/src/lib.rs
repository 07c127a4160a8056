//! Chain state, UTXO views, and the transaction input validation engine.

pub mod check_inputs;
pub mod checkqueue;
pub mod scriptcache;
pub mod state;
pub mod utxo;
pub mod validation;

pub use check_inputs::{check_inputs, InputsError, ScriptCheck};
pub use scriptcache::ScriptExecutionCache;
pub use state::{BlockTip, ChainState, ChainStateError, ConnectedBlock};
pub use utxo::{Coin, CoinView, UtxoSet};
