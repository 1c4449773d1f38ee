use cpay_types::chain::ProviderError;
use cpay_types::config::ConfigurationError;
use cpay_types::engine::{EngineError, PolicyViolationError};
use cpay_types::proto::ArgumentError;
use std::time::Duration;

/// Errors surfaced by payment operations.
///
/// Verification never returns one of these: provider failures become
/// [`PaymentVerificationResult::Unknown`](cpay_types::proto::PaymentVerificationResult::Unknown)
/// and sweeps skip instead.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Static setup is missing or invalid.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The caller passed invalid input.
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    /// Key derivation or transaction signing failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A built sweep transaction broke standardness rules and was not broadcast.
    #[error(transparent)]
    PolicyViolation(#[from] PolicyViolationError),
    /// Chain data needed by the operation could not be fetched.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The payment did not confirm before the deadline.
    #[error("Payment not confirmed within {0:?}")]
    Timeout(Duration),
    /// The wait was cancelled by the caller.
    #[error("Waiting for confirmation was cancelled")]
    Cancelled,
}
