//! Per-network consensus parameters.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Main,
    Test,
    Regtest,
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    /// Blocks between subsidy halvings.
    pub subsidy_halving_interval: i32,
    pub coinbase_maturity: i32,
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Main => ConsensusParams {
            network,
            subsidy_halving_interval: 210_000,
            coinbase_maturity: crate::constants::COINBASE_MATURITY,
        },
        Network::Test => ConsensusParams {
            network,
            subsidy_halving_interval: 210_000,
            coinbase_maturity: crate::constants::COINBASE_MATURITY,
        },
        Network::Regtest => ConsensusParams {
            network,
            subsidy_halving_interval: 150,
            coinbase_maturity: crate::constants::COINBASE_MATURITY,
        },
    }
}
