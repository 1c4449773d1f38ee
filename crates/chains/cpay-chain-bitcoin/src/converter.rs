//! Fiat to BTC conversion using the blockchain.info ticker.

use cpay_types::converter::{ConversionError, FiatCurrency, PaymentConverter};
use cpay_types::proto::AssetType;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

pub const TICKER_URL: &str = "https://blockchain.info/ticker";

const SUPPORTED_FIAT: [FiatCurrency; 3] = [FiatCurrency::Usd, FiatCurrency::Cad, FiatCurrency::Eur];

#[derive(Debug, Deserialize)]
struct TickerQuote {
    last: f64,
}

/// Converts fiat amounts to BTC at the ticker's `last` price, rounded half
/// away from zero to 8 decimal places.
#[derive(Debug, Clone)]
pub struct BitcoinTickerConverter {
    client: Client,
    ticker_url: Url,
    timeout: Option<Duration>,
}

impl Default for BitcoinTickerConverter {
    fn default() -> Self {
        Self::new(Url::parse(TICKER_URL).expect("valid ticker URL"))
    }
}

impl BitcoinTickerConverter {
    pub fn new(ticker_url: Url) -> Self {
        Self {
            client: Client::new(),
            ticker_url,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn last_price(&self, fiat: FiatCurrency) -> Result<Decimal, ConversionError> {
        let mut request = self.client.get(self.ticker_url.clone());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ConversionError::PriceSource(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(ConversionError::PriceSource(format!(
                "Ticker answered HTTP {}",
                response.status()
            )));
        }
        let quotes: HashMap<String, TickerQuote> = response
            .json()
            .await
            .map_err(|e| ConversionError::PriceSource(e.to_string()))?;
        let quote = quotes.get(fiat.code()).ok_or(ConversionError::InvalidPrice {
            fiat,
            detail: "currency missing from ticker".to_string(),
        })?;
        match Decimal::from_f64(quote.last) {
            Some(price) if price > Decimal::ZERO => Ok(price),
            _ => Err(ConversionError::InvalidPrice {
                fiat,
                detail: format!("'last' is {}", quote.last),
            }),
        }
    }
}

#[async_trait::async_trait]
impl PaymentConverter for BitcoinTickerConverter {
    fn asset(&self) -> AssetType {
        AssetType::Btc
    }

    fn supported_fiat(&self) -> &[FiatCurrency] {
        &SUPPORTED_FIAT
    }

    async fn convert(
        &self,
        amount: Decimal,
        fiat: FiatCurrency,
    ) -> Result<Decimal, ConversionError> {
        if amount.is_sign_negative() {
            return Err(ConversionError::NegativeAmount(amount));
        }
        if !SUPPORTED_FIAT.contains(&fiat) {
            return Err(ConversionError::UnsupportedFiat {
                asset: AssetType::Btc,
                fiat,
            });
        }
        let price = self.last_price(fiat).await?;
        Ok((amount / price).round_dp_with_strategy(8, RoundingStrategy::MidpointAwayFromZero))
    }
}
