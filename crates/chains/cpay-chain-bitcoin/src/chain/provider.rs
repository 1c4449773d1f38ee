use bitcoin::{Address, Txid};
use cpay_types::chain::{
    ChainDataProvider, ChainTransaction, FeeEstimates, FromConfig, ProviderError, SpendableOutput,
};
use cpay_types::network::Network;
use reqwest::{Client, StatusCode};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::chain::config::{EsploraConfig, default_base_url, with_trailing_slash};
use crate::chain::types::{EsploraTransaction, EsploraUtxo};

/// [`ChainDataProvider`] backed by an Esplora REST API.
///
/// Every call goes to the network; nothing is cached. The provider is bound
/// to one Bitcoin network, which decides how deposit addresses are parsed.
///
/// # Example
///
/// ```ignore
/// use cpay_chain_bitcoin::EsploraProvider;
/// use cpay_types::network::Network;
///
/// let provider = EsploraProvider::for_network(Network::Main);
/// let height = provider.tip_height().await?;
/// ```
#[derive(Clone)]
pub struct EsploraProvider {
    network: Network,
    base_url: Url,
    client: Client,
    timeout: Option<Duration>,
}

impl Debug for EsploraProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsploraProvider")
            .field("network", &self.network)
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl EsploraProvider {
    pub const NAME: &'static str = "Blockstream (Esplora)";

    /// Creates a provider talking to `base_url`.
    pub fn new(network: Network, base_url: Url) -> Self {
        Self {
            network,
            base_url: with_trailing_slash(base_url),
            client: Client::new(),
            timeout: None,
        }
    }

    /// Creates a provider for the public Blockstream instance of `network`.
    pub fn for_network(network: Network) -> Self {
        Self::new(network, default_base_url(network))
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::InvalidArgument(format!("Invalid path '{path}': {e}")))
    }

    fn require_non_blank<'a>(value: &'a str, what: &str) -> Result<&'a str, ProviderError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ProviderError::InvalidArgument(format!(
                "{what} must be provided"
            )));
        }
        Ok(trimmed)
    }

    /// Sends a request and returns the body of a successful response.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<String, ProviderError> {
        let request = match self.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::transport(context, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::transport(context, e))?;
        let result = if status == StatusCode::OK {
            Ok(body)
        } else {
            Err(ProviderError::HttpStatus {
                context: context.to_string(),
                status: status.as_u16(),
                body,
            })
        };
        record_result(&result, context);
        result
    }

    async fn get_text(&self, url: Url, context: &str) -> Result<String, ProviderError> {
        self.send(self.client.get(url), context).await
    }

    async fn get_json<R>(&self, url: Url, context: &str) -> Result<R, ProviderError>
    where
        R: serde::de::DeserializeOwned,
    {
        let body = self.get_text(url, context).await?;
        serde_json::from_str(&body).map_err(|e| ProviderError::decode(context, e))
    }

    fn parse_address(&self, address: &str) -> Result<Address, ProviderError> {
        Address::from_str(address)
            .map_err(|e| ProviderError::InvalidArgument(format!("Invalid address '{address}': {e}")))?
            .require_network(self.network.into())
            .map_err(|e| ProviderError::InvalidArgument(format!("Invalid address '{address}': {e}")))
    }
}

#[async_trait::async_trait]
impl ChainDataProvider for EsploraProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "cpay.esplora.tip_height", skip_all, err)
    )]
    async fn tip_height(&self) -> Result<u64, ProviderError> {
        let context = "GET blocks/tip/height";
        let body = self.get_text(self.endpoint("blocks/tip/height")?, context).await?;
        match body.trim().parse::<u64>() {
            Ok(height) if height > 0 => Ok(height),
            _ => Err(ProviderError::decode(
                context,
                format!("Invalid tip height response: '{}'", body.trim()),
            )),
        }
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "cpay.esplora.address_transactions", skip(self), err)
    )]
    async fn address_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<ChainTransaction>, ProviderError> {
        let address = Self::require_non_blank(address, "Address")?;
        let url = self.endpoint(&format!("address/{address}/txs"))?;
        let txs: Vec<EsploraTransaction> = self.get_json(url, "GET address/{address}/txs").await?;
        txs.into_iter().map(ChainTransaction::try_from).collect()
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "cpay.esplora.transaction", skip(self), err)
    )]
    async fn transaction(&self, txid: &Txid) -> Result<ChainTransaction, ProviderError> {
        let url = self.endpoint(&format!("tx/{txid}"))?;
        let tx: EsploraTransaction = self.get_json(url, "GET tx/{txid}").await?;
        tx.try_into()
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "cpay.esplora.spendable_outputs", skip(self), err)
    )]
    async fn spendable_outputs(
        &self,
        address: &str,
    ) -> Result<Vec<SpendableOutput>, ProviderError> {
        let address = Self::require_non_blank(address, "Address")?;
        let url = self.endpoint(&format!("address/{address}/utxo"))?;
        let utxos: Vec<EsploraUtxo> = self.get_json(url, "GET address/{address}/utxo").await?;
        if utxos.is_empty() {
            return Ok(Vec::new());
        }
        let tip_height = self.tip_height().await?;
        let script_pubkey = self.parse_address(address)?.script_pubkey();
        utxos
            .into_iter()
            .map(|utxo| utxo.into_spendable(script_pubkey.clone(), tip_height))
            .collect()
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "cpay.esplora.fee_estimates", skip_all, err)
    )]
    async fn fee_estimates(&self) -> Result<FeeEstimates, ProviderError> {
        let estimates: std::collections::HashMap<String, f64> = self
            .get_json(self.endpoint("fee-estimates")?, "GET fee-estimates")
            .await?;
        Ok(estimates
            .into_iter()
            .filter_map(|(target, rate)| target.parse::<u16>().ok().map(|t| (t, rate)))
            .collect())
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "cpay.esplora.broadcast", skip_all, err)
    )]
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, ProviderError> {
        let context = "POST tx";
        let raw_tx_hex = Self::require_non_blank(raw_tx_hex, "Transaction hex")?;
        let request = self
            .client
            .post(self.endpoint("tx")?)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(raw_tx_hex.to_string());
        let body = self.send(request, context).await?;
        Txid::from_str(body.trim()).map_err(|e| ProviderError::decode(context, e))
    }
}

#[async_trait::async_trait]
impl FromConfig<EsploraConfig> for EsploraProvider {
    async fn from_config(config: &EsploraConfig) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(EsploraProvider::new(config.network, config.base_url())
            .with_timeout(config.request_timeout()))
    }
}

/// Logs the outcome of a request. Noop if telemetry feature is off.
#[cfg(feature = "telemetry")]
fn record_result<R, E: Display>(result: &Result<R, E>, context: &str) {
    match result {
        Ok(_) => tracing::debug!(context, "Esplora request succeeded"),
        Err(err) => tracing::warn!(context, error = %err, "Esplora request failed"),
    }
}

#[cfg(not(feature = "telemetry"))]
fn record_result<R, E: Display>(_result: &Result<R, E>, _context: &str) {}
