#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Bitcoin support for cpay.
//!
//! This crate provides the concrete collaborators the payment core talks to
//! when it runs against the Bitcoin network:
//!
//! - [`EsploraProvider`] - a [`ChainDataProvider`](cpay_types::chain::ChainDataProvider)
//!   over the Esplora HTTP API (blockstream.info by default)
//! - [`BitcoinEngine`] - a [`KeyAndTransactionEngine`](cpay_types::engine::KeyAndTransactionEngine)
//!   deriving BIP-84 keys from a BIP-39 mnemonic and building P2WPKH sweeps
//! - [`BitcoinTickerConverter`] - fiat to BTC conversion from the blockchain.info ticker
//!
//! # Feature Flags
//!
//! - `telemetry` - Emits `tracing` events for HTTP calls and signing
//!
//! # Example
//!
//! ```ignore
//! use cpay_chain_bitcoin::{BitcoinEngine, EsploraProvider};
//! use cpay_types::network::Network;
//!
//! let provider = EsploraProvider::for_network(Network::Test);
//! let tip = provider.tip_height().await?;
//! ```

pub mod chain;
pub mod converter;
pub mod engine;

pub use chain::{EsploraConfig, EsploraConfigInner, EsploraProvider};
pub use converter::BitcoinTickerConverter;
pub use engine::BitcoinEngine;
