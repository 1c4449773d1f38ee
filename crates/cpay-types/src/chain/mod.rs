//! Chain data access for payment verification and sweeping.
//!
//! # Architecture
//!
//! - [`ChainDataProvider`] - Object-safe async trait every chain backend implements
//! - [`ChainTransaction`], [`SpendableOutput`] - Chain-agnostic view of on-chain data
//! - [`FeeRate`], [`FeeEstimates`] - Fee rates keyed by confirmation target
//! - [`FromConfig`] - Async construction of providers from configuration

mod types;

pub use types::*;

use bitcoin::Txid;
use std::sync::Arc;

use crate::config::FeePolicy;

/// Asynchronously constructs an instance of `Self` from a configuration type.
///
/// Used to build chain data providers and converters from the configuration
/// file.
///
/// Return an error if:
/// - Configuration values are invalid or missing
/// - Required HTTP clients cannot be constructed
#[async_trait::async_trait]
pub trait FromConfig<TConfig>
where
    Self: Sized,
{
    async fn from_config(config: &TConfig) -> Result<Self, Box<dyn std::error::Error>>;
}

/// Errors returned by a [`ChainDataProvider`].
///
/// Payment verification and sweeping never propagate these: verification
/// folds them into an `Unknown` result and sweeping skips.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The request could not be sent or the response not read.
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The backend answered with a non-success status.
    #[error("{context}: HTTP {status}: {body}")]
    HttpStatus {
        context: String,
        status: u16,
        body: String,
    },
    /// The response body could not be decoded.
    #[error("{context}: {message}")]
    Decode { context: String, message: String },
    /// The caller passed something the backend cannot handle.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The requested object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The fee estimates carry no rate for the requested target.
    #[error("No fee estimate for a {0}-block target")]
    MissingFeeTarget(u16),
}

impl ProviderError {
    pub fn transport<C, E>(context: C, source: E) -> Self
    where
        C: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        ProviderError::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn decode<C: Into<String>, M: ToString>(context: C, message: M) -> Self {
        ProviderError::Decode {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// Read access to chain state and transaction submission.
///
/// Every call re-fetches live data; implementations keep no cache. The
/// network is fixed when the provider is constructed.
#[async_trait::async_trait]
pub trait ChainDataProvider: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Height of the current best block.
    async fn tip_height(&self) -> Result<u64, ProviderError>;

    /// All transactions touching `address`, confirmed and pending.
    async fn address_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<ChainTransaction>, ProviderError>;

    async fn transaction(&self, txid: &Txid) -> Result<ChainTransaction, ProviderError>;

    /// Unspent outputs locked to `address`, with confirmations at query time.
    async fn spendable_outputs(&self, address: &str)
    -> Result<Vec<SpendableOutput>, ProviderError>;

    async fn fee_estimates(&self) -> Result<FeeEstimates, ProviderError>;

    /// Submits a raw transaction in hex and returns its id.
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, ProviderError>;

    /// Resolves a fee policy to the backend's estimate for its target.
    async fn fee_rate(&self, policy: FeePolicy) -> Result<FeeRate, ProviderError> {
        let estimates = self.fee_estimates().await?;
        estimates
            .for_policy(policy)
            .ok_or(ProviderError::MissingFeeTarget(policy.target_blocks()))
    }
}

#[async_trait::async_trait]
impl<T: ChainDataProvider + ?Sized> ChainDataProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn tip_height(&self) -> Result<u64, ProviderError> {
        (**self).tip_height().await
    }

    async fn address_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<ChainTransaction>, ProviderError> {
        (**self).address_transactions(address).await
    }

    async fn transaction(&self, txid: &Txid) -> Result<ChainTransaction, ProviderError> {
        (**self).transaction(txid).await
    }

    async fn spendable_outputs(
        &self,
        address: &str,
    ) -> Result<Vec<SpendableOutput>, ProviderError> {
        (**self).spendable_outputs(address).await
    }

    async fn fee_estimates(&self) -> Result<FeeEstimates, ProviderError> {
        (**self).fee_estimates().await
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, ProviderError> {
        (**self).broadcast(raw_tx_hex).await
    }

    async fn fee_rate(&self, policy: FeePolicy) -> Result<FeeRate, ProviderError> {
        (**self).fee_rate(policy).await
    }
}
