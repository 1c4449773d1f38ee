//! Bitcoin payments for merchants.
//!
//! Every order gets its own deposit address, derived deterministically from
//! the merchant wallet, a secret salt and the order's metadata. Payments are
//! verified against an Esplora-compatible chain backend, optionally by
//! polling until confirmed, and confirmed deposits can be swept into a
//! master address.
//!
//! # Modules
//!
//! - [`config`] — JSON configuration file with environment variable references.
//! - [`deposit`] — Deterministic derivation of per-order deposit addresses.
//! - [`verify`] — Matching chain activity against an expected payment.
//! - [`poll`] — Waiting for confirmation with timeout and cancellation.
//! - [`sweep`] — Consolidating deposits into the master address.
//!
//! # Example
//!
//! ```no_run
//! use cpay::{Config, PaymentFactory, VerifyOptions};
//! use cpay::types::chain::FromConfig;
//! use cpay::types::metadata::PaymentMetadata;
//! use bitcoin::Amount;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_from_path("cpay.json")?;
//! let factory = PaymentFactory::from_config(&config).await?;
//! let metadata = PaymentMetadata::new().with("order_id", "1001")?;
//! let payment = factory.create_btc_payment(Amount::from_sat(50_000), metadata)?;
//! println!("Pay to {}", payment.address());
//! let result = payment.verify(VerifyOptions::default()).await;
//! println!("Status: {}", result.status());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod deposit;
pub mod error;
pub mod payment;
pub mod poll;
pub mod sweep;
#[cfg(test)]
mod test_util;
pub mod verify;

pub use cpay_chain_bitcoin as chain_bitcoin;
pub use cpay_types as types;

pub use config::{Config, ConfigError};
pub use error::PaymentError;
pub use payment::{Payment, PaymentFactory, VerifyOptions};
pub use poll::WaitOptions;
pub use sweep::{SkipReason, SweepOutcome};
