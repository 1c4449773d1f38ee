use cpay_types::config::LiteralOrEnv;
use cpay_types::network::Network;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Public Esplora instance for Bitcoin mainnet.
pub const MAINNET_BASE_URL: &str = "https://blockstream.info/api/";
/// Public Esplora instance for Bitcoin testnet.
pub const TESTNET_BASE_URL: &str = "https://blockstream.info/testnet/api/";

/// Configuration of an [`EsploraProvider`](super::EsploraProvider).
///
/// Combines the network the merchant runs on with the endpoint settings read
/// from the `esplora` section of the configuration file.
#[derive(Debug, Clone)]
pub struct EsploraConfig {
    pub network: Network,
    pub inner: EsploraConfigInner,
}

impl EsploraConfig {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            inner: EsploraConfigInner::default(),
        }
    }

    /// The configured endpoint, or the public Blockstream instance for the network.
    pub fn base_url(&self) -> Url {
        match &self.inner.base_url {
            Some(url) => with_trailing_slash(url.inner().clone()),
            None => default_base_url(self.network),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.inner.request_timeout_secs)
    }
}

/// Endpoint settings for Esplora.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EsploraConfigInner {
    /// Esplora API root, overriding the network default (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<LiteralOrEnv<Url>>,
    /// Per-request timeout in seconds (optional).
    #[serde(default = "esplora_config::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EsploraConfigInner {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: esplora_config::default_request_timeout_secs(),
        }
    }
}

mod esplora_config {
    pub fn default_request_timeout_secs() -> u64 {
        30
    }
}

pub fn default_base_url(network: Network) -> Url {
    let raw = match network {
        Network::Main => MAINNET_BASE_URL,
        Network::Test => TESTNET_BASE_URL,
    };
    Url::parse(raw).expect("valid Esplora URL")
}

/// Relative joins drop the last path segment unless the base ends with `/`.
pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls_per_network() {
        assert_eq!(
            EsploraConfig::new(Network::Main).base_url().as_str(),
            "https://blockstream.info/api/"
        );
        assert_eq!(
            EsploraConfig::new(Network::Test).base_url().as_str(),
            "https://blockstream.info/testnet/api/"
        );
    }

    #[test]
    fn test_override_gets_trailing_slash() {
        let inner: EsploraConfigInner =
            serde_json::from_str(r#"{"base_url":"http://localhost:3002/api"}"#).unwrap();
        let config = EsploraConfig {
            network: Network::Test,
            inner,
        };
        assert_eq!(config.base_url().as_str(), "http://localhost:3002/api/");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }
}
