//! Block subsidy schedule.

use crate::money::{Amount, COIN};
use crate::params::ConsensusParams;

const INITIAL_SUBSIDY: Amount = 50 * COIN;

pub fn block_subsidy(height: i32, params: &ConsensusParams) -> Amount {
    if height < 0 {
        return 0;
    }
    let halvings = height / params.subsidy_halving_interval;
    // Subsidy reaches zero once the shift consumes all 64 bits.
    if halvings >= 64 {
        return 0;
    }
    INITIAL_SUBSIDY >> halvings
}
