//! Matching on-chain activity against an expected payment.

use bitcoin::{Amount, Txid};
use cpay_types::chain::{ChainDataProvider, ChainTransaction, confirmations};
use cpay_types::proto::PaymentVerificationResult;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// A transaction paying at least the requested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    txid: Txid,
    confirmations: u32,
    amount: Amount,
}

impl Candidate {
    /// Whether `self` should replace `best`: more confirmations win, equal
    /// counts go to the smaller txid.
    fn beats(&self, best: &Candidate) -> bool {
        self.confirmations > best.confirmations
            || (self.confirmations == best.confirmations && self.txid < best.txid)
    }
}

/// Verifies payments against a chain data provider.
pub struct PaymentVerifier<'a> {
    provider: &'a dyn ChainDataProvider,
}

impl<'a> PaymentVerifier<'a> {
    pub fn new(provider: &'a dyn ChainDataProvider) -> Self {
        Self { provider }
    }

    /// Looks for a transaction paying at least `requested` to `address` and
    /// classifies it against `threshold` confirmations.
    ///
    /// Provider failures and indeterminate confirmation data yield
    /// [`PaymentVerificationResult::Unknown`]; this never returns an error.
    #[cfg_attr(
        feature = "telemetry",
        instrument(skip(self), fields(provider = self.provider.name()))
    )]
    pub async fn verify(
        &self,
        address: &str,
        requested: Amount,
        threshold: u32,
    ) -> PaymentVerificationResult {
        let transactions = match self.provider.address_transactions(address).await {
            Ok(transactions) => transactions,
            Err(e) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %e, "Failed to fetch address transactions");
                return PaymentVerificationResult::unknown(format!(
                    "Failed to fetch transactions for {address}: {e}"
                ));
            }
        };
        if transactions.is_empty() {
            return PaymentVerificationResult::NotFound;
        }

        let mut tip: Option<u64> = None;
        let mut best: Option<Candidate> = None;
        for tx in &transactions {
            let Some(amount) = tx.amount_paid_to(address) else {
                return PaymentVerificationResult::unknown(format!(
                    "Output values of transaction {} overflow",
                    tx.txid
                ));
            };
            if amount < requested || amount == Amount::ZERO {
                continue;
            }
            let confirmations = match self.confirmations_of(tx, &mut tip).await {
                Ok(confirmations) => confirmations,
                Err(message) => return PaymentVerificationResult::unknown(message),
            };
            let candidate = Candidate {
                txid: tx.txid,
                confirmations,
                amount,
            };
            if best.is_none_or(|b| candidate.beats(&b)) {
                best = Some(candidate);
            }
        }

        match best {
            None => PaymentVerificationResult::NotFound,
            Some(c) if c.confirmations >= threshold => PaymentVerificationResult::Confirmed {
                txid: c.txid,
                confirmations: c.confirmations,
                amount: c.amount,
            },
            Some(c) => PaymentVerificationResult::Unconfirmed {
                txid: c.txid,
                confirmations: c.confirmations,
                amount: c.amount,
            },
        }
    }

    /// Confirmation count of `tx`, fetching the tip into `tip` on first use.
    async fn confirmations_of(
        &self,
        tx: &ChainTransaction,
        tip: &mut Option<u64>,
    ) -> Result<u32, String> {
        if !tx.status.confirmed {
            return Ok(0);
        }
        let height = tx
            .status
            .block_height
            .ok_or_else(|| format!("Transaction {} is confirmed without a block height", tx.txid))?;
        let tip_height = match *tip {
            Some(tip_height) => tip_height,
            None => {
                let tip_height = self
                    .provider
                    .tip_height()
                    .await
                    .map_err(|e| format!("Failed to fetch tip height: {e}"))?;
                if tip_height == 0 {
                    return Err("Provider reported a non-positive tip height".to_string());
                }
                *tip = Some(tip_height);
                tip_height
            }
        };
        Ok(confirmations(height, tip_height))
    }
}
