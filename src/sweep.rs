//! Consolidating confirmed deposits into the master address.
//!
//! A sweep spends every eligible output at a deposit address to the
//! configured master address in one transaction with no change. Conditions
//! that make a sweep pointless (nothing to spend, amounts under the minimum,
//! an unreachable provider) produce [`SweepOutcome::Skipped`]; only a built
//! transaction that breaks standardness rules is an error, and it is never
//! broadcast.

use bitcoin::{Address, Amount, Txid};
use cpay_types::chain::{ChainDataProvider, FeeRate, SpendableOutput, checked_sum};
use cpay_types::config::{ConfigurationError, FeePolicy, PaymentOptions};
use cpay_types::engine::{
    EngineError, KeyAndTransactionEngine, PolicyViolationError, SweepRequest,
};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use crate::deposit::DepositAddress;
use crate::error::PaymentError;

/// Why a sweep did nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The wallet has no auto-sweep options.
    NotConfigured,
    NoMasterAddress,
    NoSpendableOutputs,
    /// Outputs exist but none has enough confirmations yet.
    NoEligibleOutputs,
    /// The eligible total is under the minimum sweep amount.
    BelowMinimum { total: Amount, minimum: Amount },
    /// After fees the master address would receive less than the minimum.
    DestinationBelowMinimum { received: Amount, minimum: Amount },
    ProviderUnavailable(String),
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotConfigured => write!(f, "auto-sweep is not configured"),
            SkipReason::NoMasterAddress => write!(f, "no master address configured"),
            SkipReason::NoSpendableOutputs => write!(f, "no spendable outputs"),
            SkipReason::NoEligibleOutputs => {
                write!(f, "no outputs with enough confirmations")
            }
            SkipReason::BelowMinimum { total, minimum } => {
                write!(f, "eligible total {total} is below the minimum {minimum}")
            }
            SkipReason::DestinationBelowMinimum { received, minimum } => write!(
                f,
                "master address would receive {received}, below the minimum {minimum}"
            ),
            SkipReason::ProviderUnavailable(detail) => {
                write!(f, "chain data provider unavailable: {detail}")
            }
        }
    }
}

/// Result of a sweep attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Broadcast {
        txid: Txid,
        /// Amount received by the master address.
        swept: Amount,
        fee: Amount,
        inputs: usize,
    },
    Skipped(SkipReason),
}

impl SweepOutcome {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, SweepOutcome::Broadcast { .. })
    }

    pub fn txid(&self) -> Option<Txid> {
        match self {
            SweepOutcome::Broadcast { txid, .. } => Some(*txid),
            SweepOutcome::Skipped(_) => None,
        }
    }
}

/// Fee rate for `policy`, falling back to the policy's static rate when the
/// provider has no usable estimate. Never below [`FeeRate::MIN_RELAY`].
pub async fn resolve_fee_rate(provider: &dyn ChainDataProvider, policy: FeePolicy) -> FeeRate {
    let rate = match provider.fee_rate(policy).await {
        Ok(rate) => rate,
        Err(_e) => {
            let fallback = FeeRate::from_sat_per_vb(policy.fallback_sat_per_vb() as f64);
            #[cfg(feature = "telemetry")]
            tracing::warn!(
                error = %_e,
                ?policy,
                fallback = %fallback,
                "Fee estimate unavailable, using fallback rate"
            );
            fallback
        }
    };
    rate.max(FeeRate::MIN_RELAY)
}

fn skipped(reason: SkipReason) -> Result<SweepOutcome, PaymentError> {
    #[cfg(feature = "telemetry")]
    tracing::debug!(reason = %reason, "Sweep skipped");
    Ok(SweepOutcome::Skipped(reason))
}

/// Plans and executes sweeps for one set of options.
pub struct AutoSweepPlanner<'a> {
    options: &'a PaymentOptions,
    provider: &'a dyn ChainDataProvider,
    engine: &'a dyn KeyAndTransactionEngine,
}

impl<'a> AutoSweepPlanner<'a> {
    pub fn new(
        options: &'a PaymentOptions,
        provider: &'a dyn ChainDataProvider,
        engine: &'a dyn KeyAndTransactionEngine,
    ) -> Self {
        Self {
            options,
            provider,
            engine,
        }
    }

    /// Sweeps every eligible output at `deposit` to the master address.
    pub async fn sweep(&self, deposit: &DepositAddress) -> Result<SweepOutcome, PaymentError> {
        let Some(auto_sweep) = self.options.auto_sweep() else {
            return skipped(SkipReason::NotConfigured);
        };
        let Some(master_address) = self.options.master_address() else {
            return skipped(SkipReason::NoMasterAddress);
        };
        let destination = Address::from_str(master_address.trim())
            .map_err(|e| ConfigurationError::InvalidMasterAddress(e.to_string()))?
            .require_network(self.options.network.into())
            .map_err(|e| ConfigurationError::InvalidMasterAddress(e.to_string()))?;

        let address = deposit.address().to_string();
        let outputs = match self.provider.spendable_outputs(&address).await {
            Ok(outputs) => outputs,
            Err(e) => return self.provider_unavailable("spendable outputs", e),
        };
        if outputs.is_empty() {
            return skipped(SkipReason::NoSpendableOutputs);
        }
        let eligible: Vec<SpendableOutput> = outputs
            .into_iter()
            .filter(|o| o.confirmations >= auto_sweep.min_confirmations)
            .collect();
        if eligible.is_empty() {
            return skipped(SkipReason::NoEligibleOutputs);
        }
        let Some(total) = checked_sum(eligible.iter().map(|o| o.value)) else {
            return skipped(SkipReason::ProviderUnavailable(
                "spendable output values overflow".to_string(),
            ));
        };
        if total < auto_sweep.min_sweep_amount {
            return skipped(SkipReason::BelowMinimum {
                total,
                minimum: auto_sweep.min_sweep_amount,
            });
        }

        let fee_rate = resolve_fee_rate(self.provider, auto_sweep.fee_policy).await;
        let request = SweepRequest {
            key: &deposit.key,
            outputs: &eligible,
            destination: &destination,
            fee_rate,
            enable_rbf: auto_sweep.enable_rbf,
        };
        let tx = match self.engine.build_sweep_transaction(&request) {
            Ok(tx) => tx,
            Err(EngineError::InsufficientFunds { .. }) => {
                return skipped(SkipReason::DestinationBelowMinimum {
                    received: Amount::ZERO,
                    minimum: auto_sweep.min_sweep_amount,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let violations = self.engine.verify_policy(&tx, &eligible);
        if !violations.is_empty() {
            let error = PolicyViolationError::new(violations);
            #[cfg(feature = "telemetry")]
            tracing::error!(error = %error, "Sweep transaction rejected by policy");
            return Err(error.into());
        }

        let received = checked_sum(
            tx.output
                .iter()
                .filter(|o| o.script_pubkey == destination.script_pubkey())
                .map(|o| o.value),
        )
        .unwrap_or(Amount::ZERO);
        if received < auto_sweep.min_sweep_amount {
            return skipped(SkipReason::DestinationBelowMinimum {
                received,
                minimum: auto_sweep.min_sweep_amount,
            });
        }
        let fee = total
            .checked_sub(checked_sum(tx.output.iter().map(|o| o.value)).unwrap_or(total))
            .unwrap_or(Amount::ZERO);

        let raw = hex::encode(bitcoin::consensus::serialize(&tx));
        let txid = match self.provider.broadcast(&raw).await {
            Ok(txid) => txid,
            Err(e) => return self.provider_unavailable("broadcast", e),
        };

        #[cfg(feature = "telemetry")]
        tracing::info!(
            %txid,
            deposit = %address,
            destination = %destination,
            swept = received.to_sat(),
            fee = fee.to_sat(),
            inputs = eligible.len(),
            "Broadcast sweep transaction"
        );

        Ok(SweepOutcome::Broadcast {
            txid,
            swept: received,
            fee,
            inputs: eligible.len(),
        })
    }

    fn provider_unavailable(
        &self,
        operation: &str,
        error: cpay_types::chain::ProviderError,
    ) -> Result<SweepOutcome, PaymentError> {
        #[cfg(feature = "telemetry")]
        tracing::warn!(
            provider = self.provider.name(),
            operation,
            error = %error,
            "Provider failure during sweep"
        );
        skipped(SkipReason::ProviderUnavailable(format!(
            "{operation}: {error}"
        )))
    }

    /// Whether funds at `deposit` appear to have been swept already.
    ///
    /// `false` while spendable outputs remain or if the address never
    /// received anything. Otherwise `true` when some transaction spends only
    /// from the deposit address into at most two outputs.
    pub async fn was_swept(&self, deposit: &DepositAddress) -> Result<bool, PaymentError> {
        let address = deposit.address().to_string();
        if !self.provider.spendable_outputs(&address).await?.is_empty() {
            return Ok(false);
        }
        let transactions = self.provider.address_transactions(&address).await?;
        let received = transactions
            .iter()
            .any(|tx| tx.amount_paid_to(&address) != Some(Amount::ZERO));
        if !received {
            return Ok(false);
        }
        Ok(transactions.iter().any(|tx| {
            !tx.inputs.is_empty()
                && tx.outputs.len() <= 2
                && tx.inputs.iter().all(|input| {
                    input
                        .prevout_address
                        .as_deref()
                        .is_some_and(|a| a.eq_ignore_ascii_case(&address))
                })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deposit::DepositAddressDeriver;
    use crate::test_util::{MockProvider, master_address, options, payment_tx, utxo};
    use bitcoin::OutPoint;
    use cpay_chain_bitcoin::BitcoinEngine;
    use cpay_types::chain::{ChainTransaction, FeeEstimates, TxInput, TxOutput, TxStatus};
    use cpay_types::config::{AutoSweepOptions, WalletOptions};
    use cpay_types::engine::{DerivedKey, PolicyViolation};
    use cpay_types::metadata::PaymentMetadata;
    use cpay_types::network::Network;
    use std::sync::Arc;

    struct Fixture {
        options: PaymentOptions,
        provider: Arc<MockProvider>,
        engine: BitcoinEngine,
        deposit: DepositAddress,
    }

    fn deposit_for(options: &PaymentOptions, engine: &BitcoinEngine) -> DepositAddress {
        let metadata = PaymentMetadata::new().with("order_id", "sweep-1").unwrap();
        DepositAddressDeriver::new(options, engine)
            .derive(&metadata)
            .unwrap()
    }

    /// Builds a fixture whose provider is configured by `configure`, given
    /// the deposit address and its locking script.
    fn fixture<F>(configure: F) -> Fixture
    where
        F: FnOnce(MockProvider, &DepositAddress) -> MockProvider,
    {
        let engine = BitcoinEngine::new();
        let deposit = deposit_for(&options(Network::Main, MockProvider::default()), &engine);
        let provider = Arc::new(configure(MockProvider::default(), &deposit));
        let options = options(Network::Main, MockProvider::default())
            .with_shared_provider(provider.clone());
        Fixture {
            options,
            provider,
            engine,
            deposit,
        }
    }

    impl Fixture {
        async fn sweep(&self) -> Result<SweepOutcome, PaymentError> {
            AutoSweepPlanner::new(&self.options, self.provider.as_ref(), &self.engine)
                .sweep(&self.deposit)
                .await
        }
    }

    fn script(deposit: &DepositAddress) -> bitcoin::ScriptBuf {
        deposit.address().script_pubkey()
    }

    #[tokio::test]
    async fn test_below_minimum_is_skipped() {
        let f = fixture(|p, d| {
            let address = d.address().to_string();
            p.with_utxos(&address, vec![utxo(1, 5_000, script(d), 3)])
        });
        let outcome = f.sweep().await.unwrap();
        assert_eq!(
            outcome,
            SweepOutcome::Skipped(SkipReason::BelowMinimum {
                total: Amount::from_sat(5_000),
                minimum: Amount::from_sat(10_000),
            })
        );
        assert!(f.provider.broadcasts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_broadcasts_signed_transaction() {
        let f = fixture(|p, d| {
            let address = d.address().to_string();
            p.with_utxos(
                &address,
                vec![utxo(1, 60_000, script(d), 2), utxo(2, 40_000, script(d), 1)],
            )
            .with_fees(Some([(6, 2.0)].into_iter().collect()))
        });
        let outcome = f.sweep().await.unwrap();
        let SweepOutcome::Broadcast {
            txid,
            swept,
            fee,
            inputs,
        } = outcome.clone()
        else {
            panic!("expected a broadcast, got {outcome:?}");
        };
        assert_eq!(inputs, 2);
        assert_eq!(swept + fee, Amount::from_sat(100_000));
        assert!(fee > Amount::ZERO);

        let broadcasts = f.provider.broadcasts.lock().unwrap();
        assert_eq!(broadcasts.len(), 1);
        let tx: bitcoin::Transaction =
            bitcoin::consensus::deserialize(&hex::decode(&broadcasts[0]).unwrap()).unwrap();
        assert_eq!(tx.compute_txid(), txid);
        assert_eq!(tx.output.len(), 1);
        let master = Address::from_str(master_address(Network::Main))
            .unwrap()
            .assume_checked();
        assert_eq!(tx.output[0].script_pubkey, master.script_pubkey());
        assert!(tx.input.iter().all(|i| i.sequence.is_rbf()));
        assert!(tx.input.iter().all(|i| !i.witness.is_empty()));
    }

    #[tokio::test]
    async fn test_not_configured_and_no_master_address() {
        let engine = BitcoinEngine::new();
        let mut options = options(Network::Main, MockProvider::default());
        let deposit = deposit_for(&options, &engine);
        let provider = MockProvider::default();

        options.wallet = Some(
            WalletOptions::default()
                .with_mnemonic(crate::test_util::MNEMONIC)
                .with_master_address(master_address(Network::Main)),
        );
        let outcome = AutoSweepPlanner::new(&options, &provider, &engine)
            .sweep(&deposit)
            .await
            .unwrap();
        assert_eq!(outcome, SweepOutcome::Skipped(SkipReason::NotConfigured));

        options.wallet = Some(
            WalletOptions::default()
                .with_mnemonic(crate::test_util::MNEMONIC)
                .with_auto_sweep(AutoSweepOptions::default()),
        );
        let outcome = AutoSweepPlanner::new(&options, &provider, &engine)
            .sweep(&deposit)
            .await
            .unwrap();
        assert_eq!(outcome, SweepOutcome::Skipped(SkipReason::NoMasterAddress));
    }

    #[tokio::test]
    async fn test_no_spendable_and_no_eligible_outputs() {
        let f = fixture(|p, _| p);
        assert_eq!(
            f.sweep().await.unwrap(),
            SweepOutcome::Skipped(SkipReason::NoSpendableOutputs)
        );

        let f = fixture(|p, d| {
            let address = d.address().to_string();
            p.with_utxos(&address, vec![utxo(1, 500_000, script(d), 0)])
        });
        assert_eq!(
            f.sweep().await.unwrap(),
            SweepOutcome::Skipped(SkipReason::NoEligibleOutputs)
        );
    }

    #[tokio::test]
    async fn test_provider_failures_are_absorbed() {
        let f = fixture(|p, _| p.without_utxos());
        assert!(matches!(
            f.sweep().await.unwrap(),
            SweepOutcome::Skipped(SkipReason::ProviderUnavailable(_))
        ));

        let f = fixture(|p, d| {
            let address = d.address().to_string();
            p.with_utxos(&address, vec![utxo(1, 500_000, script(d), 6)])
                .with_failing_broadcast()
        });
        let outcome = f.sweep().await.unwrap();
        assert!(
            matches!(&outcome, SweepOutcome::Skipped(SkipReason::ProviderUnavailable(detail)) if detail.starts_with("broadcast"))
        );
    }

    #[tokio::test]
    async fn test_fee_falls_back_when_estimates_fail() {
        let failing = MockProvider::default().with_fees(None);
        assert_eq!(
            resolve_fee_rate(&failing, FeePolicy::High).await,
            FeeRate::from_sat_per_kvb(10_000)
        );
        let missing = MockProvider::default()
            .with_fees(Some(FeeEstimates::from_iter([(2, 30.0)])));
        assert_eq!(
            resolve_fee_rate(&missing, FeePolicy::Low).await,
            FeeRate::from_sat_per_kvb(1_000)
        );
        assert_eq!(
            resolve_fee_rate(&missing, FeePolicy::High).await,
            FeeRate::from_sat_per_kvb(30_000)
        );
    }

    #[tokio::test]
    async fn test_sub_relay_estimate_is_raised_to_floor() {
        let cheap = MockProvider::default().with_fees(Some([(6, 0.5)].into_iter().collect()));
        assert_eq!(
            resolve_fee_rate(&cheap, FeePolicy::Medium).await,
            FeeRate::MIN_RELAY
        );

        let f = fixture(|p, d| {
            let address = d.address().to_string();
            p.with_utxos(&address, vec![utxo(1, 100_000, script(d), 1)])
                .with_fees(Some([(6, 0.5)].into_iter().collect()))
        });
        let outcome = f.sweep().await.unwrap();
        assert!(outcome.is_broadcast(), "unexpected outcome {outcome:?}");
        assert_eq!(f.provider.broadcasts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overflowing_output_values_are_skipped() {
        let huge = u64::MAX / 2 + 30_000;
        let f = fixture(|p, d| {
            let address = d.address().to_string();
            p.with_utxos(
                &address,
                vec![utxo(1, huge, script(d), 3), utxo(2, huge, script(d), 3)],
            )
        });
        let outcome = f.sweep().await.unwrap();
        assert!(matches!(
            &outcome,
            SweepOutcome::Skipped(SkipReason::ProviderUnavailable(detail)) if detail.contains("overflow")
        ));
        assert!(f.provider.broadcasts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fee_eating_the_balance_is_skipped() {
        let f = fixture(|p, d| {
            let address = d.address().to_string();
            p.with_utxos(&address, vec![utxo(1, 12_000, script(d), 1)])
                .with_fees(Some([(6, 50.0)].into_iter().collect()))
        });
        assert!(matches!(
            f.sweep().await.unwrap(),
            SweepOutcome::Skipped(SkipReason::DestinationBelowMinimum { .. })
        ));
        assert!(f.provider.broadcasts.lock().unwrap().is_empty());
    }

    /// Delegates to [`BitcoinEngine`] but reports a fixed violation.
    struct StrictEngine(BitcoinEngine);

    impl KeyAndTransactionEngine for StrictEngine {
        fn master_secret(&self, mnemonic: &str) -> Result<[u8; 32], EngineError> {
            self.0.master_secret(mnemonic)
        }

        fn derive_key(
            &self,
            mnemonic: &str,
            path: &bitcoin::bip32::DerivationPath,
            network: Network,
        ) -> Result<DerivedKey, EngineError> {
            self.0.derive_key(mnemonic, path, network)
        }

        fn build_sweep_transaction(
            &self,
            request: &SweepRequest<'_>,
        ) -> Result<bitcoin::Transaction, EngineError> {
            self.0.build_sweep_transaction(request)
        }

        fn verify_policy(
            &self,
            _tx: &bitcoin::Transaction,
            _spent: &[SpendableOutput],
        ) -> Vec<PolicyViolation> {
            vec![PolicyViolation::FeeTooHigh {
                fee: Amount::from_sat(1),
                maximum: Amount::ZERO,
            }]
        }
    }

    #[tokio::test]
    async fn test_policy_violation_is_not_broadcast() {
        let f = fixture(|p, d| {
            let address = d.address().to_string();
            p.with_utxos(&address, vec![utxo(1, 500_000, script(d), 6)])
        });
        let engine = StrictEngine(BitcoinEngine::new());
        let result = AutoSweepPlanner::new(&f.options, f.provider.as_ref(), &engine)
            .sweep(&f.deposit)
            .await;
        match result {
            Err(PaymentError::PolicyViolation(error)) => {
                assert_eq!(error.violations.len(), 1);
            }
            other => panic!("expected a policy violation, got {other:?}"),
        }
        assert!(f.provider.broadcasts.lock().unwrap().is_empty());
    }

    fn sweep_tx(n: u8, from: &str, inputs: usize, outputs: usize) -> ChainTransaction {
        ChainTransaction {
            txid: crate::test_util::txid(n),
            status: TxStatus::confirmed_at(50),
            inputs: (0..inputs)
                .map(|i| TxInput {
                    previous_output: Some(OutPoint::new(crate::test_util::txid(1), i as u32)),
                    prevout_address: Some(from.to_string()),
                    prevout_value: Some(Amount::from_sat(50_000)),
                })
                .collect(),
            outputs: (0..outputs)
                .map(|_| TxOutput {
                    address: Some("bc1qmaster".to_string()),
                    value: Amount::from_sat(20_000),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_was_swept_detection() {
        let engine = BitcoinEngine::new();
        let deposit = deposit_for(&options(Network::Main, MockProvider::default()), &engine);
        let address = deposit.address().to_string();
        let check = |provider: MockProvider| {
            let options = options(Network::Main, MockProvider::default());
            let deposit = deposit.clone();
            async move {
                AutoSweepPlanner::new(&options, &provider, &BitcoinEngine::new())
                    .was_swept(&deposit)
                    .await
                    .unwrap()
            }
        };

        // never funded
        assert!(!check(MockProvider::default()).await);

        let funded = payment_tx(1, &address, 100_000, TxStatus::confirmed_at(40));
        let swept = MockProvider::default()
            .with_transactions(Some(vec![funded.clone(), sweep_tx(2, &address, 2, 1)]));
        assert!(check(swept).await);

        let pending = MockProvider::default()
            .with_transactions(Some(vec![funded.clone(), sweep_tx(2, &address, 2, 1)]))
            .with_utxos(&address, vec![utxo(3, 1_000, deposit.address().script_pubkey(), 1)]);
        assert!(!check(pending).await);

        let fanned_out = MockProvider::default()
            .with_transactions(Some(vec![funded, sweep_tx(2, &address, 1, 3)]));
        assert!(!check(fanned_out).await);
    }
}
