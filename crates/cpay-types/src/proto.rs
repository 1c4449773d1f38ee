//! Payment verification outcomes and caller-input errors.
//!
//! A verification never fails with an error: provider hiccups and
//! indeterminate confirmation data are folded into
//! [`PaymentVerificationResult::Unknown`], so a status check cannot crash
//! the caller.

use bitcoin::{Amount, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;

use crate::util::MoneyAmountParseError;

/// The asset a payment is denominated in.
///
/// Only BTC is modeled; the enum exists so that converters and payments can
/// name the asset explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetType {
    Btc,
}

impl Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetType::Btc => write!(f, "BTC"),
        }
    }
}

/// Coarse status of a payment, without the attached details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    NotFound,
    Unconfirmed,
    Confirmed,
    Unknown,
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::NotFound => write!(f, "not_found"),
            PaymentStatus::Unconfirmed => write!(f, "unconfirmed"),
            PaymentStatus::Confirmed => write!(f, "confirmed"),
            PaymentStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// The outcome of a single payment verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentVerificationResult {
    /// No transaction paying at least the requested amount was found.
    NotFound,
    /// A matching transaction exists but has fewer confirmations than required.
    Unconfirmed {
        txid: Txid,
        confirmations: u32,
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        amount: Amount,
    },
    /// A matching transaction reached the confirmation threshold.
    Confirmed {
        txid: Txid,
        confirmations: u32,
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        amount: Amount,
    },
    /// The status could not be determined (provider failure or indeterminate
    /// confirmation data).
    Unknown { message: String },
}

impl PaymentVerificationResult {
    pub fn unknown<M: Into<String>>(message: M) -> Self {
        PaymentVerificationResult::Unknown {
            message: message.into(),
        }
    }

    pub fn status(&self) -> PaymentStatus {
        match self {
            PaymentVerificationResult::NotFound => PaymentStatus::NotFound,
            PaymentVerificationResult::Unconfirmed { .. } => PaymentStatus::Unconfirmed,
            PaymentVerificationResult::Confirmed { .. } => PaymentStatus::Confirmed,
            PaymentVerificationResult::Unknown { .. } => PaymentStatus::Unknown,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, PaymentVerificationResult::Confirmed { .. })
    }

    /// Transaction id of the selected candidate, if any.
    pub fn txid(&self) -> Option<Txid> {
        match self {
            PaymentVerificationResult::Unconfirmed { txid, .. }
            | PaymentVerificationResult::Confirmed { txid, .. } => Some(*txid),
            _ => None,
        }
    }

    /// Confirmations of the selected candidate, `0` when there is none.
    pub fn confirmations(&self) -> u32 {
        match self {
            PaymentVerificationResult::Unconfirmed { confirmations, .. }
            | PaymentVerificationResult::Confirmed { confirmations, .. } => *confirmations,
            _ => 0,
        }
    }

    /// Amount paid to the deposit address by the selected candidate.
    pub fn amount(&self) -> Option<Amount> {
        match self {
            PaymentVerificationResult::Unconfirmed { amount, .. }
            | PaymentVerificationResult::Confirmed { amount, .. } => Some(*amount),
            _ => None,
        }
    }

    /// Diagnostic message for [`PaymentVerificationResult::Unknown`].
    pub fn message(&self) -> Option<&str> {
        match self {
            PaymentVerificationResult::Unknown { message } => Some(message),
            _ => None,
        }
    }
}

/// Invalid input supplied by the caller of a payment operation.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ArgumentError {
    /// A metadata key was empty or whitespace.
    #[error("Metadata key cannot be blank")]
    BlankMetadataKey,
    /// The metadata lacks a key listed in the required derivation keys, or
    /// its value is blank.
    #[error("Payment metadata is missing required derivation key '{0}'")]
    MissingMetadata(String),
    /// The requested amount is not a positive BTC amount.
    #[error("Invalid payment amount: {0}")]
    InvalidAmount(#[from] MoneyAmountParseError),
    /// The payment asset is not handled by this crate.
    #[error("Payment asset '{0}' is not supported")]
    UnsupportedAsset(AssetType),
}
