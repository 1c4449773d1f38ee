use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Txid};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Display;

use crate::config::FeePolicy;

/// Confirmation status of a transaction as reported by the chain backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_hash: Option<BlockHash>,
    pub block_time: Option<u64>,
}

impl TxStatus {
    pub fn unconfirmed() -> Self {
        Self::default()
    }

    pub fn confirmed_at(block_height: u64) -> Self {
        Self {
            confirmed: true,
            block_height: Some(block_height),
            ..Self::default()
        }
    }
}

/// Number of blocks from `block_height` up to `tip_height`, inclusive.
///
/// Returns `0` when the tip has not reached the block yet (stale tip read) or
/// for a zero height.
pub fn confirmations(block_height: u64, tip_height: u64) -> u32 {
    if block_height == 0 || tip_height < block_height {
        return 0;
    }
    u32::try_from(tip_height - block_height + 1).unwrap_or(u32::MAX)
}

/// An input together with the output it spends, when known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// `None` for coinbase inputs.
    pub previous_output: Option<OutPoint>,
    pub prevout_address: Option<String>,
    pub prevout_value: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// `None` for outputs without a standard address (e.g. `OP_RETURN`).
    pub address: Option<String>,
    pub value: Amount,
}

/// A transaction touching an address of interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub txid: Txid,
    pub status: TxStatus,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl ChainTransaction {
    /// Sum of all outputs paying `address`, compared case-insensitively.
    ///
    /// `None` if the values reported for the outputs overflow.
    pub fn amount_paid_to(&self, address: &str) -> Option<Amount> {
        checked_sum(
            self.outputs
                .iter()
                .filter(|o| matches_address(o.address.as_deref(), address))
                .map(|o| o.value),
        )
    }

    /// Whether any input spends an output previously locked to `address`.
    pub fn spends_from(&self, address: &str) -> bool {
        self.inputs
            .iter()
            .any(|i| matches_address(i.prevout_address.as_deref(), address))
    }
}

/// Adds amounts without wrapping; `None` on overflow.
pub fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Option<Amount> {
    amounts
        .into_iter()
        .try_fold(Amount::ZERO, |total, amount| total.checked_add(amount))
}

fn matches_address(candidate: Option<&str>, address: &str) -> bool {
    candidate.is_some_and(|c| c.eq_ignore_ascii_case(address))
}

/// An unspent output at a deposit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableOutput {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    /// Confirmations at query time, `0` while in the mempool.
    pub confirmations: u32,
}

/// A fee rate in satoshis per 1000 virtual bytes.
///
/// Never below 1 sat/kvB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const MIN: FeeRate = FeeRate(1);
    /// Default minimum relay fee, 1 sat/vB.
    pub const MIN_RELAY: FeeRate = FeeRate(1_000);

    pub fn from_sat_per_kvb(sat_per_kvb: u64) -> Self {
        FeeRate(sat_per_kvb.max(1))
    }

    /// Converts a (possibly fractional) sat/vB rate, rounding up.
    pub fn from_sat_per_vb(sat_per_vb: f64) -> Self {
        let sat_per_kvb = (sat_per_vb * 1000.0).ceil();
        if sat_per_kvb.is_finite() && sat_per_kvb >= 1.0 {
            FeeRate(sat_per_kvb as u64)
        } else {
            FeeRate::MIN
        }
    }

    pub fn sat_per_kvb(&self) -> u64 {
        self.0
    }

    /// Fee for a transaction of `vsize` virtual bytes, rounded up.
    ///
    /// Saturates instead of overflowing.
    pub fn fee_for_vsize(&self, vsize: u64) -> Amount {
        Amount::from_sat(self.0.saturating_mul(vsize).div_ceil(1000))
    }
}

impl Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat/kvB", self.0)
    }
}

/// Fee estimates in sat/vB keyed by confirmation target in blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeEstimates(BTreeMap<u16, f64>);

impl FeeEstimates {
    pub fn new(estimates: BTreeMap<u16, f64>) -> Self {
        Self(estimates)
    }

    pub fn get(&self, target_blocks: u16) -> Option<FeeRate> {
        self.0
            .get(&target_blocks)
            .map(|sat_per_vb| FeeRate::from_sat_per_vb(*sat_per_vb))
    }

    /// The estimate for the policy's exact confirmation target.
    pub fn for_policy(&self, policy: FeePolicy) -> Option<FeeRate> {
        self.get(policy.target_blocks())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(u16, f64)> for FeeEstimates {
    fn from_iter<I: IntoIterator<Item = (u16, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
