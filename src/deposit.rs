//! Deterministic per-order deposit addresses.
//!
//! A deposit index is derived from the wallet master secret, the merchant's
//! derivation salt and the canonical metadata string:
//!
//! ```text
//! key   = SHA-256(master_secret || salt)
//! mac   = HMAC-SHA256(key, canonical_metadata)
//! index = u32::from_le_bytes(mac[0..4]) % modulus
//! path  = m/84'/{coin}'/0'/0/{index}
//! ```
//!
//! The key engine then derives the key at that path and its P2WPKH address.
//! Identical inputs always reproduce the same address and key.

use bitcoin::bip32::{ChildNumber, DerivationPath};
use cpay_types::config::{ConfigurationError, PaymentOptions};
use cpay_types::engine::{DerivedKey, EngineError, KeyAndTransactionEngine};
use cpay_types::metadata::PaymentMetadata;
use cpay_types::network::Network;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::PaymentError;

/// BIP-84 purpose level.
pub const PURPOSE: u32 = 84;

/// A derived deposit address and the key controlling it.
#[derive(Debug, Clone)]
pub struct DepositAddress {
    pub index: u32,
    pub key: DerivedKey,
}

impl DepositAddress {
    pub fn address(&self) -> &bitcoin::Address {
        &self.key.address
    }

    pub fn path(&self) -> &DerivationPath {
        &self.key.path
    }
}

/// Reduces the keyed digest of `canonical` to a derivation index.
pub fn derivation_index(
    master_secret: &[u8; 32],
    salt: &str,
    canonical: &str,
    modulus: u32,
) -> Result<u32, EngineError> {
    let mut hasher = Sha256::new();
    hasher.update(master_secret);
    hasher.update(salt.as_bytes());
    let key_material = hasher.finalize();

    let mut mac = Hmac::<Sha256>::new_from_slice(&key_material)
        .map_err(|e| EngineError::Derivation(e.to_string()))?;
    mac.update(canonical.as_bytes());
    let digest = mac.finalize().into_bytes();

    let head = [digest[0], digest[1], digest[2], digest[3]];
    Ok(u32::from_le_bytes(head) % modulus.max(1))
}

/// `m/84'/{coin}'/0'/0/{index}` for the given network.
pub fn derivation_path(network: Network, index: u32) -> Result<DerivationPath, EngineError> {
    let hardened =
        |i: u32| ChildNumber::from_hardened_idx(i).map_err(|e| EngineError::Derivation(e.to_string()));
    let normal =
        |i: u32| ChildNumber::from_normal_idx(i).map_err(|e| EngineError::Derivation(e.to_string()));
    Ok(DerivationPath::from(vec![
        hardened(PURPOSE)?,
        hardened(network.coin_type())?,
        hardened(0)?,
        normal(0)?,
        normal(index)?,
    ]))
}

/// Derives deposit addresses for validated options.
pub struct DepositAddressDeriver<'a> {
    options: &'a PaymentOptions,
    engine: &'a dyn KeyAndTransactionEngine,
}

impl<'a> DepositAddressDeriver<'a> {
    pub fn new(options: &'a PaymentOptions, engine: &'a dyn KeyAndTransactionEngine) -> Self {
        Self { options, engine }
    }

    /// Derives the deposit address for `metadata`.
    ///
    /// Fails with a configuration error when mnemonic, salt or derivation
    /// keys are missing, and with an argument error when `metadata` lacks a
    /// required key.
    pub fn derive(&self, metadata: &PaymentMetadata) -> Result<DepositAddress, PaymentError> {
        let mnemonic = self
            .options
            .mnemonic()
            .ok_or(ConfigurationError::MissingMnemonic)?;
        let salt = self
            .options
            .salt()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigurationError::MissingSalt)?;
        if self.options.required_derivation_keys.is_empty() {
            return Err(ConfigurationError::NoDerivationKeys.into());
        }
        let canonical = metadata.canonical_string(&self.options.required_derivation_keys)?;

        let master_secret = self.engine.master_secret(mnemonic)?;
        let index = derivation_index(
            &master_secret,
            salt,
            &canonical,
            self.options.derivation_index_modulus,
        )?;
        let path = derivation_path(self.options.network, index)?;
        let key = self.engine.derive_key(mnemonic, &path, self.options.network)?;

        #[cfg(feature = "telemetry")]
        tracing::info!(
            index,
            path = %path,
            address = %key.address,
            "Derived deposit address"
        );

        Ok(DepositAddress { index, key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{MNEMONIC, options_with_provider};
    use cpay_chain_bitcoin::BitcoinEngine;
    use cpay_types::proto::ArgumentError;
    use std::collections::HashSet;

    fn metadata(pairs: &[(&str, &str)]) -> PaymentMetadata {
        PaymentMetadata::from_pairs(pairs.iter().copied()).unwrap()
    }

    #[test]
    fn test_derivation_index_is_little_endian_and_reduced() {
        let secret = [7u8; 32];
        let index = derivation_index(&secret, "merchant-salt", "order_id=1", 10_000_000).unwrap();
        assert!(index < 10_000_000);

        let mut hasher = Sha256::new();
        hasher.update(secret);
        hasher.update(b"merchant-salt");
        let mut mac = Hmac::<Sha256>::new_from_slice(&hasher.finalize()).unwrap();
        mac.update(b"order_id=1");
        let digest = mac.finalize().into_bytes();
        let raw = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        assert_eq!(index, raw % 10_000_000);
        assert_eq!(
            derivation_index(&secret, "merchant-salt", "order_id=1", 1).unwrap(),
            0
        );
    }

    #[test]
    fn test_derivation_path_per_network() {
        assert_eq!(
            derivation_path(Network::Main, 42).unwrap().to_string(),
            "84'/0'/0'/0/42"
        );
        assert_eq!(
            derivation_path(Network::Test, 7).unwrap().to_string(),
            "84'/1'/0'/0/7"
        );
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let options = options_with_provider(Network::Main);
        let engine = BitcoinEngine::new();
        let deriver = DepositAddressDeriver::new(&options, &engine);
        let meta = metadata(&[("order_id", "1001"), ("customer", "alice")]);
        let first = deriver.derive(&meta).unwrap();
        let second = deriver.derive(&meta).unwrap();
        assert_eq!(first.index, second.index);
        assert_eq!(first.address(), second.address());
        assert_eq!(first.key.private_key, second.key.private_key);
        assert!(first.address().to_string().starts_with("bc1q"));
        assert_eq!(
            first.path().to_string(),
            format!("84'/0'/0'/0/{}", first.index)
        );
    }

    #[test]
    fn test_metadata_order_does_not_matter() {
        let options = options_with_provider(Network::Main)
            .with_required_derivation_keys(["order_id", "customer"]);
        let engine = BitcoinEngine::new();
        let deriver = DepositAddressDeriver::new(&options, &engine);
        let a = deriver
            .derive(&metadata(&[("order_id", "1"), ("customer", "bob")]))
            .unwrap();
        let b = deriver
            .derive(&metadata(&[("CUSTOMER", " bob "), ("order_id", "1")]))
            .unwrap();
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_distinct_metadata_gives_distinct_indexes() {
        let options = options_with_provider(Network::Test);
        let engine = BitcoinEngine::new();
        let deriver = DepositAddressDeriver::new(&options, &engine);
        let indexes: HashSet<u32> = (0..20)
            .map(|i| {
                deriver
                    .derive(&metadata(&[("order_id", &format!("order-{i}"))]))
                    .unwrap()
                    .index
            })
            .collect();
        assert_eq!(indexes.len(), 20);
    }

    #[test]
    fn test_salt_changes_address() {
        let engine = BitcoinEngine::new();
        let meta = metadata(&[("order_id", "1")]);
        let options_a = options_with_provider(Network::Main);
        let options_b = options_with_provider(Network::Main).with_derivation_salt("other-salt-value");
        let a = DepositAddressDeriver::new(&options_a, &engine)
            .derive(&meta)
            .unwrap();
        let b = DepositAddressDeriver::new(&options_b, &engine)
            .derive(&meta)
            .unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn test_missing_required_metadata() {
        let options = options_with_provider(Network::Main);
        let engine = BitcoinEngine::new();
        let result = DepositAddressDeriver::new(&options, &engine)
            .derive(&metadata(&[("customer", "alice")]));
        assert!(matches!(
            result,
            Err(PaymentError::Argument(ArgumentError::MissingMetadata(key))) if key == "order_id"
        ));
    }

    #[test]
    fn test_missing_mnemonic() {
        let mut options = options_with_provider(Network::Main);
        if let Some(wallet) = options.wallet.as_mut() {
            wallet.mnemonic = None;
        }
        let engine = BitcoinEngine::new();
        let result =
            DepositAddressDeriver::new(&options, &engine).derive(&metadata(&[("order_id", "1")]));
        assert!(matches!(
            result,
            Err(PaymentError::Configuration(ConfigurationError::MissingMnemonic))
        ));
    }

    #[test]
    fn test_known_mnemonic_is_used() {
        let engine = BitcoinEngine::new();
        let secret = engine.master_secret(MNEMONIC).unwrap();
        assert_ne!(secret, [0u8; 32]);
    }
}
