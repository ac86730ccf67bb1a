//! Transaction history: per-wallet summaries and confirmed/mempool reconciliation.

use super::types::{Direction, EsploraTx, TxHistoryEntry};
use std::collections::{HashMap, HashSet};

/// Summarise `tx` from the point of view of the wallet owning `owned`.
pub fn summarize(tx: &EsploraTx, owned: &HashSet<String>) -> TxHistoryEntry {
    let is_owned = |addr: &Option<String>| addr.as_ref().map(|a| owned.contains(a)).unwrap_or(false);

    let spent: u64 = tx
        .vin
        .iter()
        .filter_map(|input| input.prevout.as_ref())
        .filter(|prev| is_owned(&prev.scriptpubkey_address))
        .map(|prev| prev.value)
        .sum();
    let received: u64 = tx.vout.iter().filter(|out| is_owned(&out.scriptpubkey_address)).map(|out| out.value).sum();
    let all_outputs_owned = !tx.vout.is_empty() && tx.vout.iter().all(|out| is_owned(&out.scriptpubkey_address));

    let (direction, amount_sat) = if spent > 0 && all_outputs_owned {
        (Direction::SelfTransfer, spent - received)
    } else if received >= spent {
        (Direction::Received, received - spent)
    } else {
        (Direction::Sent, spent - received)
    };

    TxHistoryEntry {
        txid: tx.txid.clone(),
        direction,
        amount_sat,
        fee_sat: tx.fee,
        confirmed: tx.status.confirmed,
        block_height: tx.status.block_height,
        block_time: tx.status.block_time,
    }
}

/// Deduplicates entries by txid across addresses and endpoints.
#[derive(Debug, Default)]
pub struct HistoryMerger {
    entries: HashMap<String, TxHistoryEntry>,
}

impl HistoryMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A confirmed sighting replaces a pending one's status but keeps the
    /// direction and amount computed first.
    pub fn add(&mut self, entry: TxHistoryEntry) {
        match self.entries.get_mut(&entry.txid) {
            Some(existing) => {
                if entry.confirmed && !existing.confirmed {
                    existing.confirmed = true;
                    existing.block_height = entry.block_height;
                    existing.block_time = entry.block_time;
                    existing.fee_sat = existing.fee_sat.or(entry.fee_sat);
                }
            }
            None => {
                self.entries.insert(entry.txid.clone(), entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unconfirmed first, then confirmed by block time, newest first.
    pub fn finish(self) -> Vec<TxHistoryEntry> {
        let mut out: Vec<_> = self.entries.into_values().collect();
        out.sort_by(|a, b| {
            a.confirmed
                .cmp(&b.confirmed)
                .then_with(|| b.block_time.unwrap_or(0).cmp(&a.block_time.unwrap_or(0)))
                .then_with(|| a.txid.cmp(&b.txid))
        });
        out
    }
}

pub fn merge_history(confirmed: Vec<TxHistoryEntry>, pending: Vec<TxHistoryEntry>) -> Vec<TxHistoryEntry> {
    let mut merger = HistoryMerger::new();
    pending.into_iter().chain(confirmed).for_each(|entry| merger.add(entry));
    merger.finish()
}
