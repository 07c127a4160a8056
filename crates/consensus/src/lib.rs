//! Consensus constants, parameters, and monetary rules.

pub mod constants;
pub mod money;
pub mod params;
pub mod rewards;

pub type Hash256 = [u8; 32];

pub use money::{money_range, Amount, CENT, COIN, MAX_MONEY};
pub use params::{consensus_params, ConsensusParams, Network};
pub use rewards::block_subsidy;
