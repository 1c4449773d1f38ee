//! Esplora chain data access.
//!
//! # Key Types
//!
//! - [`EsploraConfig`] - Network plus endpoint settings
//! - [`EsploraProvider`] - [`ChainDataProvider`](cpay_types::chain::ChainDataProvider) over HTTP
//! - [`EsploraTransaction`], [`EsploraUtxo`] - Wire types returned by Esplora
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | tip height | `GET blocks/tip/height` |
//! | address history | `GET address/{address}/txs` |
//! | transaction | `GET tx/{txid}` |
//! | unspent outputs | `GET address/{address}/utxo` |
//! | fee estimates | `GET fee-estimates` |
//! | broadcast | `POST tx` (hex body) |

pub mod config;
pub mod provider;
pub mod types;

pub use config::*;
pub use provider::*;
pub use types::*;
