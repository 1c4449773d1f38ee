//! Utility types for cpay.
//!
//! - [`money_amount`] - Human-readable BTC amount parsing and satoshi conversion

pub mod money_amount;

pub use money_amount::*;
