//! Esplora wire types.
//!
//! These mirror the JSON returned by the Esplora REST API and convert into the
//! chain-agnostic types of [`cpay_types::chain`].

use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Txid};
use cpay_types::chain::{
    ChainTransaction, ProviderError, SpendableOutput, TxInput, TxOutput, TxStatus, confirmations,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraTxStatus {
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraPrevout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraVin {
    pub txid: String,
    pub vout: u32,
    /// Absent for coinbase inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevout: Option<EsploraPrevout>,
    #[serde(default)]
    pub is_coinbase: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraVout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

/// A transaction as returned by `GET tx/{txid}` and `GET address/{address}/txs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraTransaction {
    pub txid: String,
    #[serde(default)]
    pub status: EsploraTxStatus,
    #[serde(default)]
    pub vin: Vec<EsploraVin>,
    #[serde(default)]
    pub vout: Vec<EsploraVout>,
}

/// An unspent output as returned by `GET address/{address}/utxo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EsploraUtxo {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub status: EsploraTxStatus,
    pub value: u64,
}

fn parse_txid(raw: &str) -> Result<Txid, ProviderError> {
    Txid::from_str(raw).map_err(|e| ProviderError::decode(format!("Invalid txid '{raw}'"), e))
}

impl TryFrom<EsploraTxStatus> for TxStatus {
    type Error = ProviderError;

    fn try_from(value: EsploraTxStatus) -> Result<Self, Self::Error> {
        let block_hash = value
            .block_hash
            .as_deref()
            .map(BlockHash::from_str)
            .transpose()
            .map_err(|e| ProviderError::decode("Invalid block hash", e))?;
        Ok(TxStatus {
            confirmed: value.confirmed,
            block_height: value.block_height,
            block_hash,
            block_time: value.block_time,
        })
    }
}

impl TryFrom<EsploraTransaction> for ChainTransaction {
    type Error = ProviderError;

    fn try_from(value: EsploraTransaction) -> Result<Self, Self::Error> {
        let txid = parse_txid(&value.txid)?;
        let inputs = value
            .vin
            .into_iter()
            .map(|vin| {
                let previous_output = if vin.is_coinbase {
                    None
                } else {
                    Some(OutPoint::new(parse_txid(&vin.txid)?, vin.vout))
                };
                let (prevout_address, prevout_value) = match vin.prevout {
                    Some(prevout) => (
                        prevout.scriptpubkey_address,
                        Some(Amount::from_sat(prevout.value)),
                    ),
                    None => (None, None),
                };
                Ok(TxInput {
                    previous_output,
                    prevout_address,
                    prevout_value,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;
        let outputs = value
            .vout
            .into_iter()
            .map(|vout| TxOutput {
                address: vout.scriptpubkey_address,
                value: Amount::from_sat(vout.value),
            })
            .collect();
        Ok(ChainTransaction {
            txid,
            status: value.status.try_into()?,
            inputs,
            outputs,
        })
    }
}

impl EsploraUtxo {
    /// Converts to a [`SpendableOutput`] locked by `script_pubkey`, counting
    /// confirmations against `tip_height`. Outputs without a block height
    /// count as unconfirmed.
    pub fn into_spendable(
        self,
        script_pubkey: ScriptBuf,
        tip_height: u64,
    ) -> Result<SpendableOutput, ProviderError> {
        let confirmations = match self.status.block_height {
            Some(height) if self.status.confirmed => confirmations(height, tip_height),
            _ => 0,
        };
        Ok(SpendableOutput {
            outpoint: OutPoint::new(parse_txid(&self.txid)?, self.vout),
            value: Amount::from_sat(self.value),
            script_pubkey,
            confirmations,
        })
    }
}
