//! Bitcoin network selector.
//!
//! cpay supports exactly two networks: Bitcoin mainnet and testnet. The
//! network decides the BIP-44 coin type used in deposit derivation paths,
//! the address human-readable part, and the default chain data endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// The Bitcoin network a merchant operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Bitcoin mainnet.
    #[default]
    #[serde(alias = "mainnet", alias = "bitcoin")]
    Main,
    /// Bitcoin testnet (testnet3).
    #[serde(alias = "testnet")]
    Test,
}

impl Network {
    /// BIP-44 coin type: `0` for mainnet, `1` for every test network.
    pub fn coin_type(&self) -> u32 {
        match self {
            Network::Main => 0,
            Network::Test => 1,
        }
    }

    /// Returns `true` for the production network.
    pub fn is_mainnet(&self) -> bool {
        matches!(self, Network::Main)
    }
}

impl From<Network> for bitcoin::Network {
    fn from(value: Network) -> Self {
        match value {
            Network::Main => bitcoin::Network::Bitcoin,
            Network::Test => bitcoin::Network::Testnet,
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Main => write!(f, "main"),
            Network::Test => write!(f, "test"),
        }
    }
}

/// Error returned when a network name is not recognized.
#[derive(Debug, thiserror::Error)]
#[error("Unknown network '{0}', expected 'main' or 'test'")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" | "bitcoin" => Ok(Network::Main),
            "test" | "testnet" => Ok(Network::Test),
            other => Err(UnknownNetwork(other.to_string())),
        }
    }
}
