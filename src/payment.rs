use bitcoin::bip32::DerivationPath;
use bitcoin::{Address, Amount, PrivateKey};
use cpay_chain_bitcoin::{BitcoinEngine, EsploraProvider};
use cpay_types::chain::{ChainDataProvider, FromConfig};
use cpay_types::config::{ConfigurationError, PaymentOptions};
use cpay_types::engine::KeyAndTransactionEngine;
use cpay_types::metadata::PaymentMetadata;
use cpay_types::proto::{ArgumentError, AssetType, PaymentVerificationResult};
use cpay_types::util::MoneyAmount;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::deposit::{DepositAddress, DepositAddressDeriver};
use crate::error::PaymentError;
use crate::poll::{WaitOptions, poll_until_confirmed};
use crate::sweep::{AutoSweepPlanner, SweepOutcome};
use crate::verify::PaymentVerifier;

/// Per-call verification settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Overrides the configured default confirmation threshold.
    pub min_confirmations: Option<u32>,
}

impl VerifyOptions {
    pub fn with_min_confirmations(confirmations: u32) -> Self {
        Self {
            min_confirmations: Some(confirmations),
        }
    }
}

/// A single order awaiting payment at its own deposit address.
///
/// Created by [`PaymentFactory`]. The payment owns the private key of its
/// deposit address, which is only used to sign sweeps.
pub struct Payment {
    amount: Amount,
    asset: AssetType,
    metadata: PaymentMetadata,
    deposit: DepositAddress,
    options: Arc<PaymentOptions>,
    provider: Arc<dyn ChainDataProvider>,
    engine: Arc<dyn KeyAndTransactionEngine>,
}

impl fmt::Debug for Payment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payment")
            .field("amount", &self.amount)
            .field("asset", &self.asset)
            .field("metadata", &self.metadata)
            .field("address", self.deposit.address())
            .field("derivation_index", &self.deposit.index)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

impl Payment {
    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn asset(&self) -> AssetType {
        self.asset
    }

    pub fn metadata(&self) -> &PaymentMetadata {
        &self.metadata
    }

    pub fn address(&self) -> &Address {
        self.deposit.address()
    }

    pub fn derivation_index(&self) -> u32 {
        self.deposit.index
    }

    pub fn derivation_path(&self) -> &DerivationPath {
        self.deposit.path()
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.deposit.key.private_key
    }

    pub fn options(&self) -> &PaymentOptions {
        &self.options
    }

    fn threshold(&self, min_confirmations: Option<u32>) -> u32 {
        min_confirmations.unwrap_or(self.options.default_confirmations)
    }

    async fn verify_at(&self, threshold: u32) -> PaymentVerificationResult {
        PaymentVerifier::new(self.provider.as_ref())
            .verify(&self.deposit.address().to_string(), self.amount, threshold)
            .await
    }

    /// Checks the chain once for a transaction settling this payment.
    pub async fn verify(&self, options: VerifyOptions) -> PaymentVerificationResult {
        self.verify_at(self.threshold(options.min_confirmations))
            .await
    }

    /// Polls until the payment is confirmed, the timeout elapses or `cancel`
    /// fires.
    pub async fn wait_until_confirmed(
        &self,
        options: WaitOptions,
        on_progress: Option<&mut (dyn FnMut(&PaymentVerificationResult) + Send)>,
        cancel: &CancellationToken,
    ) -> Result<PaymentVerificationResult, PaymentError> {
        let threshold = self.threshold(options.min_confirmations);
        poll_until_confirmed(|| self.verify_at(threshold), &options, on_progress, cancel).await
    }

    /// Consolidates confirmed funds at the deposit address into the master
    /// address, when auto-sweep is configured.
    pub async fn sweep(&self) -> Result<SweepOutcome, PaymentError> {
        AutoSweepPlanner::new(&self.options, self.provider.as_ref(), self.engine.as_ref())
            .sweep(&self.deposit)
            .await
    }

    /// Whether the deposit address appears to have been swept already.
    pub async fn was_swept(&self) -> Result<bool, PaymentError> {
        AutoSweepPlanner::new(&self.options, self.provider.as_ref(), self.engine.as_ref())
            .was_swept(&self.deposit)
            .await
    }
}

/// Creates [`Payment`]s from validated options.
///
/// Holds the only copy of the options, provider and engine that payments
/// share.
#[derive(Clone)]
pub struct PaymentFactory {
    options: Arc<PaymentOptions>,
    provider: Arc<dyn ChainDataProvider>,
    engine: Arc<dyn KeyAndTransactionEngine>,
}

impl fmt::Debug for PaymentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentFactory")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PaymentFactory {
    /// Validates `options` and wraps them for sharing.
    pub fn new<E>(options: PaymentOptions, engine: E) -> Result<Self, ConfigurationError>
    where
        E: KeyAndTransactionEngine + 'static,
    {
        options.validate()?;
        let provider = options
            .provider
            .clone()
            .ok_or(ConfigurationError::MissingProvider)?;
        Ok(Self {
            options: Arc::new(options),
            provider,
            engine: Arc::new(engine),
        })
    }

    pub fn options(&self) -> &PaymentOptions {
        &self.options
    }

    pub fn provider(&self) -> &dyn ChainDataProvider {
        self.provider.as_ref()
    }

    /// Creates a payment for a decimal BTC amount.
    ///
    /// The amount is rounded half away from zero to whole satoshis and must
    /// be positive.
    pub fn create_payment(
        &self,
        amount: MoneyAmount,
        asset: AssetType,
        metadata: PaymentMetadata,
    ) -> Result<Payment, PaymentError> {
        let amount = match asset {
            AssetType::Btc => amount.to_satoshis().map_err(ArgumentError::from)?,
        };
        self.create_btc_payment(amount, metadata)
    }

    /// Creates a payment for an exact satoshi amount.
    pub fn create_btc_payment(
        &self,
        amount: Amount,
        metadata: PaymentMetadata,
    ) -> Result<Payment, PaymentError> {
        if amount == Amount::ZERO {
            return Err(ArgumentError::InvalidAmount(
                cpay_types::util::MoneyAmountParseError::OutOfRange,
            )
            .into());
        }
        let deposit =
            DepositAddressDeriver::new(&self.options, self.engine.as_ref()).derive(&metadata)?;
        Ok(Payment {
            amount,
            asset: AssetType::Btc,
            metadata,
            deposit,
            options: self.options.clone(),
            provider: self.provider.clone(),
            engine: self.engine.clone(),
        })
    }
}

#[async_trait::async_trait]
impl FromConfig<Config> for PaymentFactory {
    async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let provider = EsploraProvider::from_config(&config.esplora_config()).await?;
        let options = config.payment.clone().with_provider(provider);
        let factory = PaymentFactory::new(options, BitcoinEngine::new())?;

        #[cfg(feature = "telemetry")]
        tracing::info!(
            network = %factory.options.network,
            provider = factory.provider.name(),
            "Payment factory ready"
        );

        Ok(factory)
    }
}
