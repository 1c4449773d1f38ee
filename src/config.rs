//! File configuration for a [`PaymentFactory`](crate::PaymentFactory).
//!
//! The configuration is a JSON document with two sections:
//!
//! ```json
//! {
//!   "payment": {
//!     "network": "test",
//!     "default_confirmations": 2,
//!     "derivation_salt": "$CPAY_SALT",
//!     "required_derivation_keys": ["order_id"],
//!     "wallet": {
//!       "mnemonic": "${CPAY_MNEMONIC}",
//!       "master_address": "tb1q...",
//!       "auto_sweep": { "fee_policy": "low", "min_sweep_amount": 0.0005 }
//!     }
//!   },
//!   "esplora": { "base_url": "https://mempool.space/testnet/api/" }
//! }
//! ```
//!
//! Secrets and URLs may reference environment variables with `$VAR` or
//! `${VAR}`.

use cpay_chain_bitcoin::{EsploraConfig, EsploraConfigInner};
use cpay_types::config::PaymentOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub payment: PaymentOptions,
    #[serde(default)]
    pub esplora: EsploraConfigInner,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }

    /// Esplora settings for the configured network.
    pub fn esplora_config(&self) -> EsploraConfig {
        EsploraConfig {
            network: self.payment.network,
            inner: self.esplora.clone(),
        }
    }
}
