//! BIP-84 key derivation and P2WPKH sweep transactions.
//!
//! [`BitcoinEngine`] turns a BIP-39 mnemonic (empty passphrase) into a BIP-32
//! master key, derives child keys at caller-supplied paths, and builds
//! sweep-all transactions that spend P2WPKH outputs to a single destination.

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, CompressedPublicKey, NetworkKind, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Witness, absolute,
};
use bip39::Mnemonic;
use cpay_types::chain::{FeeRate, SpendableOutput, checked_sum};
use cpay_types::engine::{
    DerivedKey, EngineError, KeyAndTransactionEngine, PolicyViolation, SweepRequest,
};
use cpay_types::network::Network;
use std::collections::{HashMap, HashSet};

/// Lowest fee rate relayed by default nodes.
pub const MIN_RELAY_FEE_RATE: FeeRate = FeeRate::MIN_RELAY;
/// Absolute fee above which a sweep is considered a mistake.
pub const MAX_ABSOLUTE_FEE: Amount = Amount::from_sat(10_000_000);
/// Largest standard transaction weight.
pub const MAX_STANDARD_TX_WEIGHT: u64 = 400_000;

/// Upper bound of a DER signature plus sighash byte.
const DUMMY_SIGNATURE_LEN: usize = 73;
const COMPRESSED_PUBKEY_LEN: usize = 33;

/// [`KeyAndTransactionEngine`] for Bitcoin native segwit (P2WPKH).
#[derive(Debug, Clone)]
pub struct BitcoinEngine {
    secp: Secp256k1<All>,
}

impl Default for BitcoinEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BitcoinEngine {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    fn master_key(&self, mnemonic: &str, network: NetworkKind) -> Result<Xpriv, EngineError> {
        let mnemonic = Mnemonic::parse_normalized(mnemonic.trim())
            .map_err(|e| EngineError::InvalidMnemonic(e.to_string()))?;
        let seed = mnemonic.to_seed("");
        Xpriv::new_master(network, &seed).map_err(|e| EngineError::Derivation(e.to_string()))
    }

    /// Unsigned sweep spending every output to `destination` for `value`.
    fn unsigned_sweep(request: &SweepRequest<'_>, value: Amount) -> Transaction {
        let sequence = if request.enable_rbf {
            Sequence::ENABLE_RBF_NO_LOCKTIME
        } else {
            Sequence::MAX
        };
        Transaction {
            version: Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: request
                .outputs
                .iter()
                .map(|output| TxIn {
                    previous_output: output.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![TxOut {
                value,
                script_pubkey: request.destination.script_pubkey(),
            }],
        }
    }

    /// Virtual size of `tx` once every input carries a P2WPKH witness.
    fn signed_vsize(tx: &Transaction) -> u64 {
        let mut sized = tx.clone();
        for input in &mut sized.input {
            input.witness = Witness::from_slice(&[
                vec![0u8; DUMMY_SIGNATURE_LEN],
                vec![0u8; COMPRESSED_PUBKEY_LEN],
            ]);
        }
        sized.vsize() as u64
    }

    fn sign(&self, tx: &mut Transaction, request: &SweepRequest<'_>) -> Result<(), EngineError> {
        let key = request.key;
        let mut cache = SighashCache::new(tx);
        for (index, output) in request.outputs.iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(
                    index,
                    &output.script_pubkey,
                    output.value,
                    EcdsaSighashType::All,
                )
                .map_err(|e| EngineError::Signing(e.to_string()))?;
            let message = Message::from_digest(sighash.to_byte_array());
            let signature = ecdsa::Signature {
                signature: self.secp.sign_ecdsa(&message, &key.private_key.inner),
                sighash_type: EcdsaSighashType::All,
            };
            let witness = cache
                .witness_mut(index)
                .ok_or_else(|| EngineError::Signing(format!("Missing input {index}")))?;
            *witness = Witness::p2wpkh(&signature, &key.public_key.0);
        }
        Ok(())
    }
}

impl KeyAndTransactionEngine for BitcoinEngine {
    fn master_secret(&self, mnemonic: &str) -> Result<[u8; 32], EngineError> {
        let master = self.master_key(mnemonic, NetworkKind::Main)?;
        Ok(master.private_key.secret_bytes())
    }

    fn derive_key(
        &self,
        mnemonic: &str,
        path: &DerivationPath,
        network: Network,
    ) -> Result<DerivedKey, EngineError> {
        let network = bitcoin::Network::from(network);
        let master = self.master_key(mnemonic, NetworkKind::from(network))?;
        let child = master
            .derive_priv(&self.secp, path)
            .map_err(|e| EngineError::Derivation(e.to_string()))?;
        let private_key = child.to_priv();
        let public_key = CompressedPublicKey::from_private_key(&self.secp, &private_key)
            .map_err(|e| EngineError::Derivation(e.to_string()))?;
        let address = Address::p2wpkh(&public_key, network);
        Ok(DerivedKey {
            path: path.clone(),
            private_key,
            public_key,
            address,
        })
    }

    fn build_sweep_transaction(
        &self,
        request: &SweepRequest<'_>,
    ) -> Result<Transaction, EngineError> {
        if request.outputs.is_empty() {
            return Err(EngineError::NoInputs);
        }
        let own_script = request.key.address.script_pubkey();
        if let Some(index) = request
            .outputs
            .iter()
            .position(|o| o.script_pubkey != own_script)
        {
            return Err(EngineError::ForeignInput { index });
        }

        let available = request.total_input().ok_or(EngineError::AmountOverflow)?;
        let mut tx = Self::unsigned_sweep(request, available);
        let fee = request.fee_rate.fee_for_vsize(Self::signed_vsize(&tx));
        let value = available
            .checked_sub(fee)
            .filter(|value| *value > Amount::ZERO)
            .ok_or(EngineError::InsufficientFunds { available, fee })?;
        tx.output[0].value = value;

        self.sign(&mut tx, request)?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(
            txid = %tx.compute_txid(),
            inputs = tx.input.len(),
            fee = fee.to_sat(),
            "Signed sweep transaction"
        );

        Ok(tx)
    }

    fn verify_policy(&self, tx: &Transaction, spent: &[SpendableOutput]) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();
        if tx.input.is_empty() || tx.output.is_empty() {
            violations.push(PolicyViolation::Empty);
            return violations;
        }

        let spent: HashMap<OutPoint, &SpendableOutput> =
            spent.iter().map(|s| (s.outpoint, s)).collect();
        let mut seen = HashSet::new();
        let mut inputs_known = true;
        let mut total_in = Some(Amount::ZERO);
        for (index, input) in tx.input.iter().enumerate() {
            let outpoint = input.previous_output;
            if !seen.insert(outpoint) {
                violations.push(PolicyViolation::DuplicateInput { outpoint });
                continue;
            }
            match spent.get(&outpoint) {
                Some(prevout) => {
                    total_in = total_in.and_then(|t| t.checked_add(prevout.value));
                }
                None => {
                    inputs_known = false;
                    violations.push(PolicyViolation::InputMissing { index, outpoint });
                }
            }
            if input.witness.is_empty() && input.script_sig.is_empty() {
                violations.push(PolicyViolation::InputUnsigned { index });
            }
        }

        match total_in.zip(checked_sum(tx.output.iter().map(|o| o.value))) {
            None => violations.push(PolicyViolation::ValueOverflow),
            Some((total_in, total_out)) if inputs_known => match total_in.checked_sub(total_out) {
                Some(fee) => {
                    let minimum = MIN_RELAY_FEE_RATE.fee_for_vsize(tx.vsize() as u64);
                    if fee < minimum {
                        violations.push(PolicyViolation::FeeTooLow { fee, minimum });
                    }
                    if fee > MAX_ABSOLUTE_FEE {
                        violations.push(PolicyViolation::FeeTooHigh {
                            fee,
                            maximum: MAX_ABSOLUTE_FEE,
                        });
                    }
                }
                None => violations.push(PolicyViolation::OutputsExceedInputs {
                    inputs: total_in,
                    outputs: total_out,
                }),
            },
            Some(_) => {}
        }

        for (index, output) in tx.output.iter().enumerate() {
            let threshold = output.script_pubkey.minimal_non_dust();
            if output.value < threshold {
                violations.push(PolicyViolation::DustOutput {
                    index,
                    value: output.value,
                    threshold,
                });
            }
        }

        let weight = tx.weight().to_wu();
        if weight > MAX_STANDARD_TX_WEIGHT {
            violations.push(PolicyViolation::TransactionTooLarge {
                weight,
                maximum: MAX_STANDARD_TX_WEIGHT,
            });
        }

        violations
    }
}
