//! Fiat-to-asset price conversion.
//!
//! Converters are registered per [`AssetType`] in a [`ConverterRegistry`]:
//!
//! ```ignore
//! use cpay_types::converter::ConverterRegistry;
//! use cpay_chain_bitcoin::BitcoinTickerConverter;
//!
//! let registry = ConverterRegistry::new().and_register(BitcoinTickerConverter::default());
//! let btc = registry.convert(dec!(25), FiatCurrency::Usd, AssetType::Btc).await?;
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

use crate::proto::AssetType;

/// Fiat currencies a converter may quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FiatCurrency {
    Usd,
    Cad,
    Eur,
}

impl FiatCurrency {
    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            FiatCurrency::Usd => "USD",
            FiatCurrency::Cad => "CAD",
            FiatCurrency::Eur => "EUR",
        }
    }
}

impl Display for FiatCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Amount must not be negative: {0}")]
    NegativeAmount(Decimal),
    #[error("No converter registered for {0}")]
    UnsupportedAsset(AssetType),
    #[error("{asset} conversion does not support {fiat}")]
    UnsupportedFiat { asset: AssetType, fiat: FiatCurrency },
    #[error("Price source failed: {0}")]
    PriceSource(String),
    #[error("Invalid price for {fiat}: {detail}")]
    InvalidPrice { fiat: FiatCurrency, detail: String },
}

/// Converts fiat amounts to an asset amount at the current market price.
#[async_trait::async_trait]
pub trait PaymentConverter: Send + Sync {
    fn asset(&self) -> AssetType;

    fn supported_fiat(&self) -> &[FiatCurrency];

    /// Returns the asset amount worth `amount` units of `fiat`.
    async fn convert(&self, amount: Decimal, fiat: FiatCurrency)
    -> Result<Decimal, ConversionError>;
}

/// Converters keyed by the asset they produce.
#[derive(Default)]
pub struct ConverterRegistry(HashMap<AssetType, Box<dyn PaymentConverter>>);

impl Debug for ConverterRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let assets: Vec<String> = self.0.keys().map(|a| a.to_string()).collect();
        f.debug_tuple("ConverterRegistry").field(&assets).finish()
    }
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and_register<C: PaymentConverter + 'static>(mut self, converter: C) -> Self {
        self.register(converter);
        self
    }

    /// Registers a converter, replacing any previous one for the same asset.
    pub fn register<C: PaymentConverter + 'static>(&mut self, converter: C) {
        self.0.insert(converter.asset(), Box::new(converter));
    }

    pub fn by_asset(&self, asset: AssetType) -> Option<&dyn PaymentConverter> {
        self.0.get(&asset).map(|c| c.deref())
    }

    pub async fn convert(
        &self,
        amount: Decimal,
        fiat: FiatCurrency,
        asset: AssetType,
    ) -> Result<Decimal, ConversionError> {
        let converter = self
            .by_asset(asset)
            .ok_or(ConversionError::UnsupportedAsset(asset))?;
        if !converter.supported_fiat().contains(&fiat) {
            return Err(ConversionError::UnsupportedFiat { asset, fiat });
        }
        converter.convert(amount, fiat).await
    }
}
