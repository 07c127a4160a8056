//! Consensus-wide constants shared across validation.

/// The minimum allowed block version (network rule).
pub const MIN_BLOCK_VERSION: i32 = 1;
/// The minimum allowed transaction version (network rule).
pub const MIN_TX_VERSION: i32 = 1;
/// The maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: u32 = 2_000_000;
/// The maximum allowed number of signature check operations in a block (network rule).
pub const MAX_BLOCK_SIGOPS: u32 = 20_000;
/// The maximum allowed size for a serialized transaction, in bytes (network rule).
pub const MAX_TX_SIZE: u32 = 100_000;
/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 100;
/// Lock-time values below this threshold are block heights; at or above, unix times.
pub const LOCKTIME_THRESHOLD: i64 = 500_000_000;
/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Maximum number of public keys consumed by a single CHECKMULTISIG.
pub const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;
/// Blocks above this height must commit to their height in the coinbase scriptSig.
pub const COINBASE_HEIGHT_COMMITMENT_START: i32 = 20;
