//! Key derivation and transaction building.
//!
//! [`KeyAndTransactionEngine`] is the seam between payment logic and the
//! cryptography: it turns a mnemonic into keys and addresses, assembles and
//! signs sweep transactions, and checks them against standardness rules
//! before anything is broadcast.

use bitcoin::bip32::DerivationPath;
use bitcoin::{Address, Amount, CompressedPublicKey, OutPoint, PrivateKey, Transaction};
use std::fmt;
use std::fmt::Display;

use crate::chain::{FeeRate, SpendableOutput, checked_sum};
use crate::network::Network;

/// A key derived from the merchant wallet together with its P2WPKH address.
#[derive(Clone)]
pub struct DerivedKey {
    pub path: DerivationPath,
    pub private_key: PrivateKey,
    pub public_key: CompressedPublicKey,
    pub address: Address,
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("path", &self.path)
            .field("public_key", &self.public_key)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Everything needed to build a sweep-all transaction.
#[derive(Debug, Clone, Copy)]
pub struct SweepRequest<'a> {
    /// Key controlling every output in `outputs`.
    pub key: &'a DerivedKey,
    pub outputs: &'a [SpendableOutput],
    pub destination: &'a Address,
    pub fee_rate: FeeRate,
    /// Signal BIP-125 replaceability on every input.
    pub enable_rbf: bool,
}

impl SweepRequest<'_> {
    /// `None` if the output values overflow.
    pub fn total_input(&self) -> Option<Amount> {
        checked_sum(self.outputs.iter().map(|o| o.value))
    }
}

/// Errors raised while deriving keys or building transactions.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("Key derivation failed: {0}")]
    Derivation(String),
    #[error("A sweep needs at least one input")]
    NoInputs,
    #[error("Insufficient funds: {available} available, fee is {fee}")]
    InsufficientFunds { available: Amount, fee: Amount },
    #[error("Input {index} is not locked to the signing key")]
    ForeignInput { index: usize },
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Input values overflow")]
    AmountOverflow,
}

/// A single standardness rule broken by a transaction.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("fee {fee} is below the minimum relay fee {minimum}")]
    FeeTooLow { fee: Amount, minimum: Amount },
    #[error("fee {fee} exceeds the maximum {maximum}")]
    FeeTooHigh { fee: Amount, maximum: Amount },
    #[error("output {index} value {value} is below the dust threshold {threshold}")]
    DustOutput {
        index: usize,
        value: Amount,
        threshold: Amount,
    },
    #[error("transaction weight {weight} exceeds the standard maximum {maximum}")]
    TransactionTooLarge { weight: u64, maximum: u64 },
    #[error("input {outpoint} is spent more than once")]
    DuplicateInput { outpoint: OutPoint },
    #[error("input {index} spends unknown output {outpoint}")]
    InputMissing { index: usize, outpoint: OutPoint },
    #[error("input {index} is not signed")]
    InputUnsigned { index: usize },
    #[error("outputs {outputs} exceed inputs {inputs}")]
    OutputsExceedInputs { inputs: Amount, outputs: Amount },
    #[error("input or output values overflow")]
    ValueOverflow,
    #[error("transaction has no inputs or no outputs")]
    Empty,
}

/// A sweep transaction rejected before broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolationError {
    pub violations: Vec<PolicyViolation>,
}

impl PolicyViolationError {
    pub fn new(violations: Vec<PolicyViolation>) -> Self {
        Self { violations }
    }
}

impl Display for PolicyViolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sweep transaction violates policy: ")?;
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PolicyViolationError {}

/// Key derivation, transaction assembly and policy checks.
///
/// Implementations are synchronous and hold no state between calls.
pub trait KeyAndTransactionEngine: Send + Sync {
    /// The 32-byte secret of the BIP-32 master key for `mnemonic`.
    fn master_secret(&self, mnemonic: &str) -> Result<[u8; 32], EngineError>;

    /// Derives the key at `path` and its native segwit address on `network`.
    fn derive_key(
        &self,
        mnemonic: &str,
        path: &DerivationPath,
        network: Network,
    ) -> Result<DerivedKey, EngineError>;

    /// Builds and signs a transaction spending every output in the request to
    /// its destination, with no change output.
    fn build_sweep_transaction(&self, request: &SweepRequest<'_>)
    -> Result<Transaction, EngineError>;

    /// Checks `tx` against standardness rules; `spent` are the outputs it
    /// spends. An empty result means the transaction may be broadcast.
    fn verify_policy(&self, tx: &Transaction, spent: &[SpendableOutput]) -> Vec<PolicyViolation>;
}

impl<T: KeyAndTransactionEngine + ?Sized> KeyAndTransactionEngine for std::sync::Arc<T> {
    fn master_secret(&self, mnemonic: &str) -> Result<[u8; 32], EngineError> {
        (**self).master_secret(mnemonic)
    }

    fn derive_key(
        &self,
        mnemonic: &str,
        path: &DerivationPath,
        network: Network,
    ) -> Result<DerivedKey, EngineError> {
        (**self).derive_key(mnemonic, path, network)
    }

    fn build_sweep_transaction(
        &self,
        request: &SweepRequest<'_>,
    ) -> Result<Transaction, EngineError> {
        (**self).build_sweep_transaction(request)
    }

    fn verify_policy(&self, tx: &Transaction, spent: &[SpendableOutput]) -> Vec<PolicyViolation> {
        (**self).verify_policy(tx, spent)
    }
}
