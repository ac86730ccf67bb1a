//! Esplora wire types and the engine's own views of them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainStats {
    #[serde(default)]
    pub funded_txo_count: u64,
    #[serde(default)]
    pub funded_txo_sum: u64,
    #[serde(default)]
    pub spent_txo_count: u64,
    #[serde(default)]
    pub spent_txo_sum: u64,
    #[serde(default)]
    pub tx_count: u64,
}

impl ChainStats {
    pub fn net(&self) -> i64 {
        self.funded_txo_sum as i64 - self.spent_txo_sum as i64
    }
}

/// `GET /address/{addr}`
#[derive(Debug, Clone, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    #[serde(default)]
    pub chain_stats: ChainStats,
    #[serde(default)]
    pub mempool_stats: ChainStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u32>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
}

/// `GET /address/{addr}/utxo`
#[derive(Debug, Clone, Deserialize)]
pub struct UtxoEntry {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    #[serde(default)]
    pub status: TxStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxOutput {
    #[serde(default)]
    pub scriptpubkey: String,
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxInput {
    pub txid: String,
    pub vout: u32,
    pub prevout: Option<TxOutput>,
    #[serde(default)]
    pub is_coinbase: bool,
}

/// `GET /address/{addr}/txs`
#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTx {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<TxInput>,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(default)]
    pub weight: Option<u64>,
    #[serde(default)]
    pub status: TxStatus,
}

/// Spendable output. Fetched per operation, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value_satoshis: u64,
    pub confirmed: bool,
    pub source_address: String,
}

impl Utxo {
    pub fn from_entry(entry: UtxoEntry, source_address: &str) -> Self {
        Self {
            txid: entry.txid,
            vout: entry.vout,
            value_satoshis: entry.value,
            confirmed: entry.status.confirmed,
            source_address: source_address.to_string(),
        }
    }

    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.txid, self.vout)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

impl Balance {
    pub fn from_info(info: &AddressInfo) -> Self {
        Self { confirmed: info.chain_stats.net(), unconfirmed: info.mempool_stats.net() }
    }

    pub fn total(&self) -> i64 {
        self.confirmed + self.unconfirmed
    }
}

impl std::ops::Add for Balance {
    type Output = Balance;

    fn add(self, rhs: Balance) -> Balance {
        Balance { confirmed: self.confirmed + rhs.confirmed, unconfirmed: self.unconfirmed + rhs.unconfirmed }
    }
}

impl std::iter::Sum for Balance {
    fn sum<I: Iterator<Item = Balance>>(iter: I) -> Balance {
        iter.fold(Balance::default(), |a, b| a + b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressStats {
    pub address: String,
    pub tx_count: u64,
    pub balance: Balance,
}

impl AddressStats {
    pub fn from_info(info: &AddressInfo) -> Self {
        Self {
            address: info.address.clone(),
            tx_count: info.chain_stats.tx_count + info.mempool_stats.tx_count,
            balance: Balance::from_info(info),
        }
    }

    pub fn is_used(&self) -> bool {
        self.tx_count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Received,
    Sent,
    /// Every output went back to the wallet; only the fee left.
    SelfTransfer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxHistoryEntry {
    pub txid: String,
    pub direction: Direction,
    /// Net value moved, always positive; see `direction`.
    pub amount_sat: u64,
    pub fee_sat: Option<u64>,
    pub confirmed: bool,
    pub block_height: Option<u32>,
    pub block_time: Option<u64>,
}
