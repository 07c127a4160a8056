//! Local relay policy.

use veld_consensus::money::Amount;

#[derive(Clone, Debug)]
pub struct MempoolPolicy {
    pub require_standard: bool,
    /// Fee rate in base units per 1000 bytes.
    pub min_relay_fee_per_kb: Amount,
    pub max_scriptsig_size: usize,
    pub max_op_return_bytes: usize,
}

impl MempoolPolicy {
    pub fn standard(min_relay_fee_per_kb: Amount, require_standard: bool) -> Self {
        Self {
            require_standard,
            min_relay_fee_per_kb: min_relay_fee_per_kb.max(0),
            max_scriptsig_size: 1650,
            max_op_return_bytes: 80,
        }
    }

    pub fn min_relay_fee_for_size(&self, size: usize) -> Amount {
        let size = size as i64;
        self.min_relay_fee_per_kb.saturating_mul(size) / 1000
    }
}
