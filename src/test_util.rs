//! In-memory chain data provider shared by the unit tests.

use bitcoin::hashes::Hash;
use bitcoin::{Amount, OutPoint, ScriptBuf, Txid};
use cpay_types::chain::{
    ChainDataProvider, ChainTransaction, FeeEstimates, ProviderError, SpendableOutput, TxInput,
    TxOutput, TxStatus,
};
use cpay_types::config::{AutoSweepOptions, PaymentOptions, WalletOptions};
use cpay_types::network::Network;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const MAIN_MASTER_ADDRESS: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
pub const TEST_MASTER_ADDRESS: &str = "tb1q6rz28mcfaxtmd6v789l9rrlrusdprr9pqcpvkl";
pub const SALT: &str = "merchant-salt";

pub fn master_address(network: Network) -> &'static str {
    match network {
        Network::Main => MAIN_MASTER_ADDRESS,
        Network::Test => TEST_MASTER_ADDRESS,
    }
}

pub fn options_with_provider(network: Network) -> PaymentOptions {
    options(network, MockProvider::default())
}

pub fn options(network: Network, provider: MockProvider) -> PaymentOptions {
    PaymentOptions::new(network)
        .with_provider(provider)
        .with_derivation_salt(SALT)
        .with_required_derivation_keys(["order_id"])
        .with_wallet(
            WalletOptions::default()
                .with_mnemonic(MNEMONIC)
                .with_master_address(master_address(network))
                .with_auto_sweep(AutoSweepOptions::default()),
        )
}

pub fn txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

/// A transaction paying `value` to `address`.
pub fn payment_tx(n: u8, address: &str, value: u64, status: TxStatus) -> ChainTransaction {
    ChainTransaction {
        txid: txid(n),
        status,
        inputs: vec![TxInput {
            previous_output: Some(OutPoint::new(txid(n.wrapping_add(100)), 0)),
            prevout_address: Some("bc1qpayer".to_string()),
            prevout_value: Some(Amount::from_sat(value + 1_000)),
        }],
        outputs: vec![TxOutput {
            address: Some(address.to_string()),
            value: Amount::from_sat(value),
        }],
    }
}

pub fn utxo(n: u8, value: u64, script_pubkey: ScriptBuf, confirmations: u32) -> SpendableOutput {
    SpendableOutput {
        outpoint: OutPoint::new(txid(n), 0),
        value: Amount::from_sat(value),
        script_pubkey,
        confirmations,
    }
}

/// Scripted answers for every provider call; `None` fields fail with a
/// transport error.
#[derive(Debug)]
pub struct MockProvider {
    pub tip: Mutex<Option<u64>>,
    pub transactions: Mutex<Option<Vec<ChainTransaction>>>,
    pub utxos: Mutex<Option<HashMap<String, Vec<SpendableOutput>>>>,
    pub fees: Mutex<Option<FeeEstimates>>,
    pub broadcast_fails: bool,
    pub broadcasts: Mutex<Vec<String>>,
    pub tip_calls: AtomicUsize,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            tip: Mutex::new(Some(100)),
            transactions: Mutex::new(Some(Vec::new())),
            utxos: Mutex::new(Some(HashMap::new())),
            fees: Mutex::new(Some(FeeEstimates::default())),
            broadcast_fails: false,
            broadcasts: Mutex::new(Vec::new()),
            tip_calls: AtomicUsize::new(0),
        }
    }
}

impl MockProvider {
    pub fn with_tip(self, tip: Option<u64>) -> Self {
        *self.tip.lock().unwrap() = tip;
        self
    }

    pub fn with_transactions(self, transactions: Option<Vec<ChainTransaction>>) -> Self {
        *self.transactions.lock().unwrap() = transactions;
        self
    }

    pub fn with_utxos(self, address: &str, outputs: Vec<SpendableOutput>) -> Self {
        self.utxos
            .lock()
            .unwrap()
            .get_or_insert_with(HashMap::new)
            .insert(address.to_string(), outputs);
        self
    }

    pub fn without_utxos(self) -> Self {
        *self.utxos.lock().unwrap() = None;
        self
    }

    pub fn with_fees(self, fees: Option<FeeEstimates>) -> Self {
        *self.fees.lock().unwrap() = fees;
        self
    }

    pub fn with_failing_broadcast(mut self) -> Self {
        self.broadcast_fails = true;
        self
    }

    fn unavailable(context: &str) -> ProviderError {
        ProviderError::transport(context, std::io::Error::other("mock provider offline"))
    }
}

#[async_trait::async_trait]
impl ChainDataProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn tip_height(&self) -> Result<u64, ProviderError> {
        self.tip_calls.fetch_add(1, Ordering::SeqCst);
        self.tip
            .lock()
            .unwrap()
            .ok_or_else(|| Self::unavailable("tip height"))
    }

    async fn address_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<ChainTransaction>, ProviderError> {
        let transactions = self
            .transactions
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Self::unavailable("address transactions"))?;
        Ok(transactions
            .into_iter()
            .filter(|tx| {
                tx.amount_paid_to(address) != Some(Amount::ZERO) || tx.spends_from(address)
            })
            .collect())
    }

    async fn transaction(&self, txid: &Txid) -> Result<ChainTransaction, ProviderError> {
        self.transactions
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .find(|tx| tx.txid == *txid)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(txid.to_string()))
    }

    async fn spendable_outputs(
        &self,
        address: &str,
    ) -> Result<Vec<SpendableOutput>, ProviderError> {
        let utxos = self.utxos.lock().unwrap();
        let utxos = utxos
            .as_ref()
            .ok_or_else(|| Self::unavailable("spendable outputs"))?;
        Ok(utxos.get(address).cloned().unwrap_or_default())
    }

    async fn fee_estimates(&self) -> Result<FeeEstimates, ProviderError> {
        self.fees
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Self::unavailable("fee estimates"))
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, ProviderError> {
        if self.broadcast_fails {
            return Err(Self::unavailable("broadcast"));
        }
        let bytes = hex::decode(raw_tx_hex)
            .map_err(|e| ProviderError::InvalidArgument(e.to_string()))?;
        let tx: bitcoin::Transaction = bitcoin::consensus::deserialize(&bytes)
            .map_err(|e| ProviderError::InvalidArgument(e.to_string()))?;
        self.broadcasts.lock().unwrap().push(raw_tx_hex.to_string());
        Ok(tx.compute_txid())
    }
}
