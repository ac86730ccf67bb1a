//! Coin selection and fee arithmetic.
//!
//! Smallest UTXOs are consumed first. Change is kept only when it clears the
//! dust threshold after paying for the extra output; otherwise the leftover
//! is burned to fee and reported as `change_below_dust_sat`.

use crate::chain::Utxo;
use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DUST_THRESHOLD: u64 = 546;

const TX_OVERHEAD_VBYTES: u64 = 10;
const SEGWIT_MARKER_VBYTES: u64 = 2;
const INPUT_VBYTES: u64 = 68;
const OUTPUT_VBYTES: u64 = 31;

/// P2WPKH-style approximation used for every script type.
pub fn estimate_vsize(inputs: usize, outputs: usize) -> u64 {
    TX_OVERHEAD_VBYTES + SEGWIT_MARKER_VBYTES + inputs as u64 * INPUT_VBYTES + outputs as u64 * OUTPUT_VBYTES
}

pub fn estimate_fee(inputs: usize, outputs: usize, fee_rate: f64) -> u64 {
    (estimate_vsize(inputs, outputs) as f64 * fee_rate).ceil() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedOutput {
    pub value_sat: u64,
    #[serde(with = "hex::serde")]
    pub script: Vec<u8>,
    pub is_change: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPlan {
    pub selected_utxos: Vec<Utxo>,
    pub outputs: Vec<PlannedOutput>,
    pub fee_sat: u64,
    pub change_sat: u64,
    pub change_below_dust_sat: u64,
    pub fee_rate: f64,
}

impl TransactionPlan {
    pub fn total_selected(&self) -> u64 {
        self.selected_utxos.iter().map(|u| u.value_satoshis).sum()
    }

    /// Value paid to non-change outputs.
    pub fn amount_sat(&self) -> u64 {
        self.outputs.iter().filter(|o| !o.is_change).map(|o| o.value_sat).sum()
    }

    /// Fee actually paid to miners, including burned dust.
    pub fn effective_fee_sat(&self) -> u64 {
        self.fee_sat + self.change_below_dust_sat
    }

    pub fn change_output(&self) -> Option<&PlannedOutput> {
        self.outputs.iter().find(|o| o.is_change)
    }

    /// Selected value is fully accounted for and change is never dust.
    pub fn is_balanced(&self) -> bool {
        let accounted = self.amount_sat() + self.fee_sat + self.change_sat + self.change_below_dust_sat;
        let change_ok = self.change_sat == 0 || self.change_sat >= DUST_THRESHOLD;
        let change_matches = self.change_output().map(|o| o.value_sat).unwrap_or(0) == self.change_sat;
        self.total_selected() == accounted && change_ok && change_matches
    }
}

fn validate(amount_sat: u64, fee_rate: f64) -> Result<()> {
    if amount_sat == 0 {
        return Err(WalletError::validation("amount must be positive"));
    }
    if amount_sat < DUST_THRESHOLD {
        return Err(WalletError::validation(format!("amount {} sat is below the dust threshold", amount_sat)));
    }
    if !fee_rate.is_finite() || fee_rate <= 0.0 {
        return Err(WalletError::validation(format!("fee rate must be positive, got {}", fee_rate)));
    }
    Ok(())
}

/// Accumulate `ordered` until amount and fee are covered.
fn accumulate(
    ordered: &[&Utxo],
    amount_sat: u64,
    fee_rate: f64,
    recipient_script: &[u8],
    change_script: &[u8],
) -> Option<TransactionPlan> {
    let mut total = 0u64;
    for (i, utxo) in ordered.iter().enumerate() {
        total = total.saturating_add(utxo.value_satoshis);
        let n = i + 1;
        let fee_single = estimate_fee(n, 1, fee_rate);
        // The fee only grows with more inputs, so an overflowing target stays out of reach
        let target = amount_sat.checked_add(fee_single)?;
        if total < target {
            continue;
        }

        let selected: Vec<Utxo> = ordered[..n].iter().map(|u| (*u).clone()).collect();
        let mut outputs = vec![PlannedOutput { value_sat: amount_sat, script: recipient_script.to_vec(), is_change: false }];
        let fee_double = estimate_fee(n, 2, fee_rate);
        let change = amount_sat.checked_add(fee_double).and_then(|t| total.checked_sub(t)).unwrap_or(0);

        if change >= DUST_THRESHOLD {
            outputs.push(PlannedOutput { value_sat: change, script: change_script.to_vec(), is_change: true });
            return Some(TransactionPlan {
                selected_utxos: selected,
                outputs,
                fee_sat: fee_double,
                change_sat: change,
                change_below_dust_sat: 0,
                fee_rate,
            });
        }
        return Some(TransactionPlan {
            selected_utxos: selected,
            outputs,
            fee_sat: fee_single,
            change_sat: 0,
            change_below_dust_sat: total - target,
            fee_rate,
        });
    }
    None
}

/// Pick inputs paying `amount_sat` to `recipient_script` at `fee_rate` sat/vB.
///
/// Ascending order is tried first; when it cannot cover the target (many
/// small UTXOs inflating the fee) largest-first is tried before giving up.
pub fn select_coins(
    utxos: &[Utxo],
    amount_sat: u64,
    fee_rate: f64,
    recipient_script: &[u8],
    change_script: &[u8],
) -> Result<TransactionPlan> {
    validate(amount_sat, fee_rate)?;

    let mut ascending: Vec<&Utxo> = utxos.iter().collect();
    ascending.sort_by(|a, b| {
        a.value_satoshis.cmp(&b.value_satoshis).then_with(|| a.txid.cmp(&b.txid)).then_with(|| a.vout.cmp(&b.vout))
    });

    let plan = accumulate(&ascending, amount_sat, fee_rate, recipient_script, change_script).or_else(|| {
        let descending: Vec<&Utxo> = ascending.iter().rev().copied().collect();
        accumulate(&descending, amount_sat, fee_rate, recipient_script, change_script)
    });

    match plan {
        Some(plan) => {
            debug!(
                inputs = plan.selected_utxos.len(),
                fee = plan.fee_sat,
                change = plan.change_sat,
                burned = plan.change_below_dust_sat,
                "coins selected"
            );
            Ok(plan)
        }
        None => {
            let available = utxos.iter().fold(0u64, |acc, u| acc.saturating_add(u.value_satoshis));
            let needed = amount_sat
                .checked_add(estimate_fee(utxos.len().max(1), 1, fee_rate))
                .ok_or_else(|| WalletError::validation(format!("fee rate {} sat/vB overflows the fee", fee_rate)))?;
            Err(WalletError::InsufficientFunds { needed, available })
        }
    }
}
