//! Merchant configuration and its validation.
//!
//! This module provides the static options a merchant sets once at startup
//! ([`PaymentOptions`], [`WalletOptions`], [`AutoSweepOptions`]) and the
//! validator that must accept them before any payment is created.
//!
//! # Environment Variable Resolution
//!
//! Secrets are wrapped in [`LiteralOrEnv`], so configuration files can refer
//! to environment variables instead of embedding the values:
//!
//! ```json
//! {
//!   "derivation_salt": "${CPAY_SALT}",
//!   "wallet": {
//!     "mnemonic": "$CPAY_MNEMONIC",
//!     "master_address": "bc1q..."
//!   }
//! }
//! ```

use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;

use crate::chain::ChainDataProvider;
use crate::network::Network;

/// Largest accepted default confirmation threshold.
pub const MAX_DEFAULT_CONFIRMATIONS: u32 = 100;
/// Shortest accepted derivation salt, in characters.
pub const MIN_SALT_LENGTH: usize = 8;
/// Largest accepted derivation index modulus (2^31, the hardened boundary).
pub const MAX_DERIVATION_INDEX_MODULUS: u32 = 1 << 31;
/// Valid BIP-39 mnemonic lengths.
pub const MNEMONIC_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

// ============================================================================
// Environment Variable Resolution
// ============================================================================

/// A transparent wrapper that resolves environment variables during deserialization.
///
/// Supports both literal values and environment variable references:
/// - Literal: `"correct horse battery staple"`
/// - Simple env var: `"$CPAY_MNEMONIC"`
/// - Braced env var: `"${CPAY_MNEMONIC}"`
///
/// The wrapper implements `Deref` to provide transparent access to the inner type.
#[derive(Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the variable name if the string matches `$VAR` or `${VAR}` syntax.
    fn parse_env_var_syntax(s: &str) -> Option<&str> {
        if let Some(braced) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            Some(braced)
        } else if let Some(var_name) = s.strip_prefix('$') {
            let valid = !var_name.is_empty()
                && var_name.chars().all(|c| c.is_alphanumeric() || c == '_');
            valid.then_some(var_name)
        } else {
            None
        }
    }
}

impl<T> From<T> for LiteralOrEnv<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

// Values held here are usually secrets.
impl<T> fmt::Debug for LiteralOrEnv<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LiteralOrEnv(<redacted>)")
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{}' not found (referenced as '{}')",
                    var_name, s
                ))
            })?
        } else {
            s
        };

        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {}", e)))?;

        Ok(LiteralOrEnv(parsed))
    }
}

impl<T> Serialize for LiteralOrEnv<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

// ============================================================================
// Options
// ============================================================================

/// Maps a fee policy to a confirmation target and a fallback rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePolicy {
    Low,
    #[default]
    Medium,
    High,
}

impl FeePolicy {
    /// Preferred confirmation target in blocks.
    pub fn target_blocks(&self) -> u16 {
        match self {
            FeePolicy::Low => 12,
            FeePolicy::Medium => 6,
            FeePolicy::High => 2,
        }
    }

    /// Conservative rate in sat/vB used when no estimate is available.
    pub fn fallback_sat_per_vb(&self) -> u64 {
        match self {
            FeePolicy::Low => 1,
            FeePolicy::Medium => 5,
            FeePolicy::High => 10,
        }
    }
}

/// Settings for consolidating confirmed deposits into the master address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSweepOptions {
    /// Confirmations a deposit output needs before it is swept.
    #[serde(default = "config_defaults::default_sweep_min_confirmations")]
    pub min_confirmations: u32,
    #[serde(default)]
    pub fee_policy: FeePolicy,
    /// Signal BIP-125 replaceability on every swept input.
    #[serde(default = "config_defaults::default_enable_rbf")]
    pub enable_rbf: bool,
    /// Aggregate amount below which a sweep is skipped, in BTC.
    #[serde(
        default = "config_defaults::default_min_sweep_amount",
        with = "bitcoin::amount::serde::as_btc"
    )]
    pub min_sweep_amount: Amount,
}

impl Default for AutoSweepOptions {
    fn default() -> Self {
        Self {
            min_confirmations: config_defaults::default_sweep_min_confirmations(),
            fee_policy: FeePolicy::default(),
            enable_rbf: config_defaults::default_enable_rbf(),
            min_sweep_amount: config_defaults::default_min_sweep_amount(),
        }
    }
}

/// Wallet material backing deposit derivation and sweeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletOptions {
    /// BIP-39 mnemonic of the merchant wallet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<LiteralOrEnv<String>>,
    /// Account-level extended public key, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_public_key: Option<String>,
    /// Address receiving swept funds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_sweep: Option<AutoSweepOptions>,
}

impl WalletOptions {
    pub fn with_mnemonic<S: Into<String>>(mut self, mnemonic: S) -> Self {
        self.mnemonic = Some(LiteralOrEnv::from_literal(mnemonic.into()));
        self
    }

    pub fn with_extended_public_key<S: Into<String>>(mut self, xpub: S) -> Self {
        self.extended_public_key = Some(xpub.into());
        self
    }

    pub fn with_master_address<S: Into<String>>(mut self, address: S) -> Self {
        self.master_address = Some(address.into());
        self
    }

    pub fn with_auto_sweep(mut self, auto_sweep: AutoSweepOptions) -> Self {
        self.auto_sweep = Some(auto_sweep);
        self
    }
}

/// Process-wide merchant options.
///
/// Build once at startup, validate with [`PaymentOptions::validate`] and share
/// behind an [`Arc`]. The chain data provider is not part of the serialized
/// form; attach it with [`PaymentOptions::with_provider`].
#[derive(Clone, Serialize, Deserialize)]
pub struct PaymentOptions {
    #[serde(default)]
    pub network: Network,
    #[serde(skip)]
    pub provider: Option<Arc<dyn ChainDataProvider>>,
    /// Confirmation threshold used when a verification does not override it.
    #[serde(default = "config_defaults::default_confirmations")]
    pub default_confirmations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_salt: Option<LiteralOrEnv<String>>,
    /// Metadata keys feeding the canonical derivation string, in order.
    #[serde(default)]
    pub required_derivation_keys: Vec<String>,
    /// Number of buckets derivation indexes are reduced into.
    ///
    /// With the default of 10,000,000 two orders sharing wallet and salt have
    /// even odds of colliding after roughly 3,700 orders.
    #[serde(default = "config_defaults::default_derivation_index_modulus")]
    pub derivation_index_modulus: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletOptions>,
}

impl Default for PaymentOptions {
    fn default() -> Self {
        Self {
            network: Network::default(),
            provider: None,
            default_confirmations: config_defaults::default_confirmations(),
            derivation_salt: None,
            required_derivation_keys: Vec::new(),
            derivation_index_modulus: config_defaults::default_derivation_index_modulus(),
            wallet: None,
        }
    }
}

impl fmt::Debug for PaymentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentOptions")
            .field("network", &self.network)
            .field("provider", &self.provider.as_ref().map(|p| p.name()))
            .field("default_confirmations", &self.default_confirmations)
            .field("derivation_salt", &self.derivation_salt)
            .field("required_derivation_keys", &self.required_derivation_keys)
            .field("derivation_index_modulus", &self.derivation_index_modulus)
            .field("wallet", &self.wallet)
            .finish()
    }
}

impl PaymentOptions {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    pub fn with_provider<P: ChainDataProvider + 'static>(mut self, provider: P) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    pub fn with_shared_provider(mut self, provider: Arc<dyn ChainDataProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_default_confirmations(mut self, confirmations: u32) -> Self {
        self.default_confirmations = confirmations;
        self
    }

    pub fn with_derivation_salt<S: Into<String>>(mut self, salt: S) -> Self {
        self.derivation_salt = Some(LiteralOrEnv::from_literal(salt.into()));
        self
    }

    pub fn with_required_derivation_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_derivation_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_derivation_index_modulus(mut self, modulus: u32) -> Self {
        self.derivation_index_modulus = modulus;
        self
    }

    pub fn with_wallet(mut self, wallet: WalletOptions) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn auto_sweep(&self) -> Option<&AutoSweepOptions> {
        self.wallet.as_ref().and_then(|w| w.auto_sweep.as_ref())
    }

    pub fn master_address(&self) -> Option<&str> {
        self.wallet
            .as_ref()
            .and_then(|w| w.master_address.as_deref())
            .filter(|a| !a.trim().is_empty())
    }

    pub fn mnemonic(&self) -> Option<&str> {
        self.wallet
            .as_ref()
            .and_then(|w| w.mnemonic.as_ref())
            .map(|m| m.as_str())
            .filter(|m| !m.trim().is_empty())
    }

    pub fn salt(&self) -> Option<&str> {
        self.derivation_salt.as_ref().map(|s| s.as_str())
    }

    /// Checks every configuration rule, stopping at the first violation.
    ///
    /// Rules are checked in a fixed order: provider, default confirmations,
    /// salt, derivation keys, index modulus, wallet, mnemonic, master address,
    /// auto-sweep.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let result = self.check_rules();
        #[cfg(feature = "telemetry")]
        let result = result.inspect_err(|e| {
            tracing::warn!(error = %e, network = %self.network, "Payment options rejected");
        });
        result
    }

    fn check_rules(&self) -> Result<(), ConfigurationError> {
        if self.provider.is_none() {
            return Err(ConfigurationError::MissingProvider);
        }
        if self.default_confirmations > MAX_DEFAULT_CONFIRMATIONS {
            return Err(ConfigurationError::DefaultConfirmationsOutOfRange(
                self.default_confirmations,
            ));
        }
        match self.salt() {
            None => return Err(ConfigurationError::MissingSalt),
            Some(salt) if salt.trim().is_empty() => return Err(ConfigurationError::MissingSalt),
            Some(salt) if salt.chars().count() < MIN_SALT_LENGTH => {
                return Err(ConfigurationError::SaltTooShort(salt.chars().count()));
            }
            Some(_) => {}
        }
        if self.required_derivation_keys.is_empty() {
            return Err(ConfigurationError::NoDerivationKeys);
        }
        if let Some(position) = self
            .required_derivation_keys
            .iter()
            .position(|k| k.trim().is_empty())
        {
            return Err(ConfigurationError::BlankDerivationKey(position));
        }
        if self.derivation_index_modulus == 0
            || self.derivation_index_modulus > MAX_DERIVATION_INDEX_MODULUS
        {
            return Err(ConfigurationError::DerivationIndexModulusOutOfRange(
                self.derivation_index_modulus,
            ));
        }
        let wallet = self
            .wallet
            .as_ref()
            .ok_or(ConfigurationError::MissingWallet)?;
        if let Some(mnemonic) = wallet.mnemonic.as_ref() {
            let words = mnemonic.split_whitespace().count();
            if !MNEMONIC_WORD_COUNTS.contains(&words) {
                return Err(ConfigurationError::InvalidMnemonicLength(words));
            }
        }
        let master_address = self
            .master_address()
            .ok_or(ConfigurationError::MissingMasterAddress)?;
        let network = bitcoin::Network::from(self.network);
        bitcoin::Address::from_str(master_address.trim())
            .map_err(|e| ConfigurationError::InvalidMasterAddress(e.to_string()))?
            .require_network(network)
            .map_err(|e| ConfigurationError::InvalidMasterAddress(e.to_string()))?;
        match wallet.auto_sweep.as_ref() {
            Some(auto_sweep) if auto_sweep.min_sweep_amount == Amount::ZERO => {
                Err(ConfigurationError::MinSweepAmountNotPositive)
            }
            _ => Ok(()),
        }
    }
}

/// A violated configuration rule.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("A chain data provider must be configured")]
    MissingProvider,
    #[error("Default confirmations must be between 0 and {MAX_DEFAULT_CONFIRMATIONS}, got {0}")]
    DefaultConfirmationsOutOfRange(u32),
    #[error("Derivation salt is required")]
    MissingSalt,
    #[error("Derivation salt must be at least {MIN_SALT_LENGTH} characters, got {0}")]
    SaltTooShort(usize),
    #[error("At least one required derivation key must be configured")]
    NoDerivationKeys,
    #[error("Required derivation key at position {0} is blank")]
    BlankDerivationKey(usize),
    #[error("Derivation index modulus must be between 1 and {MAX_DERIVATION_INDEX_MODULUS}, got {0}")]
    DerivationIndexModulusOutOfRange(u32),
    #[error("Wallet options are required")]
    MissingWallet,
    #[error("Mnemonic must have 12, 15, 18, 21 or 24 words, got {0}")]
    InvalidMnemonicLength(usize),
    #[error("Wallet mnemonic is required for deposit derivation")]
    MissingMnemonic,
    #[error("Master address is required")]
    MissingMasterAddress,
    #[error("Master address is invalid for the configured network: {0}")]
    InvalidMasterAddress(String),
    #[error("Minimum sweep amount must be greater than zero")]
    MinSweepAmountNotPositive,
}

/// Default values for configuration fields.
pub mod config_defaults {
    use bitcoin::Amount;

    pub const DEFAULT_CONFIRMATIONS: u32 = 1;
    pub const DEFAULT_DERIVATION_INDEX_MODULUS: u32 = 10_000_000;
    pub const DEFAULT_SWEEP_MIN_CONFIRMATIONS: u32 = 1;
    pub const DEFAULT_MIN_SWEEP_SATS: u64 = 10_000;

    pub fn default_confirmations() -> u32 {
        DEFAULT_CONFIRMATIONS
    }

    pub fn default_derivation_index_modulus() -> u32 {
        DEFAULT_DERIVATION_INDEX_MODULUS
    }

    pub fn default_sweep_min_confirmations() -> u32 {
        DEFAULT_SWEEP_MIN_CONFIRMATIONS
    }

    pub fn default_enable_rbf() -> bool {
        true
    }

    pub fn default_min_sweep_amount() -> Amount {
        Amount::from_sat(DEFAULT_MIN_SWEEP_SATS)
    }
}
