//! Wallet facade: one record, one network, every operation the UI needs.

use super::record::WalletRecord;
use super::store::KeyValueStore;
use crate::address::{address_to_script, AddressRecord, AddressType};
use crate::chain::{Balance, BlockchainClient, TxHistoryEntry, Utxo};
use crate::config::{EngineConfig, Network};
use crate::error::{Result, WalletError};
use crate::keys::account::parse_fingerprint;
use crate::keys::{HdNode, Mnemonic};
use crate::psbt::{self, Psbt, PsbtDetails, WatchOnlyAccount};
use crate::tx::{select_coins, sign_plan, SignedTransaction, SigningKey, TransactionPlan};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Wallet {
    config: EngineConfig,
    record: WalletRecord,
}

impl Wallet {
    pub fn from_mnemonic<S: AsRef<str>>(config: EngineConfig, words: &[S]) -> Result<Self> {
        let mnemonic = Mnemonic::from_words(words)?;
        let record = WalletRecord::full(&mnemonic, config.address_type, config.network)?;
        info!(network = config.network.as_str(), address_type = %config.address_type, "wallet created from mnemonic");
        Ok(Self { config, record })
    }

    /// Watch-only wallet. The address type comes from the key prefix when it
    /// is a SLIP132 one, otherwise from `config`.
    pub fn watch_only(config: EngineConfig, account_xpub: &str, master_fingerprint: &str) -> Result<Self> {
        let hinted = if account_xpub.trim_start().starts_with(['x', 't']) { Some(config.address_type) } else { None };
        let record = WalletRecord::watch_only(account_xpub, master_fingerprint, hinted, config.network)?;
        info!(network = config.network.as_str(), address_type = %record.address_type, "watch-only wallet imported");
        Ok(Self { config, record })
    }

    pub fn from_record(config: EngineConfig, record: WalletRecord) -> Result<Self> {
        if record.network != config.network {
            return Err(WalletError::validation(format!(
                "wallet is on {}, engine configured for {}",
                record.network.as_str(),
                config.network.as_str()
            )));
        }
        Ok(Self { config, record })
    }

    pub fn load(config: EngineConfig, store: &dyn KeyValueStore) -> Result<Option<Self>> {
        WalletRecord::load(store)?.map(|record| Self::from_record(config, record)).transpose()
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        self.record.save(store)
    }

    pub fn record(&self) -> &WalletRecord {
        &self.record
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn network(&self) -> Network {
        self.record.network
    }

    pub fn address_type(&self) -> AddressType {
        self.record.address_type
    }

    pub fn is_watch_only(&self) -> bool {
        self.record.is_watch_only()
    }

    fn current(&self, change: bool) -> Result<&AddressRecord> {
        self.record
            .current(change)
            .ok_or_else(|| WalletError::Storage("wallet record is missing its current address".into()))
    }

    pub fn receive_address(&self) -> Result<&AddressRecord> {
        self.current(false)
    }

    pub fn change_address(&self) -> Result<&AddressRecord> {
        self.current(true)
    }

    pub fn next_receive_address(&mut self) -> Result<&AddressRecord> {
        self.record.advance(false)
    }

    pub fn next_change_address(&mut self) -> Result<&AddressRecord> {
        self.record.advance(true)
    }

    /// Flip `used` for addresses with chain activity, then move each branch's
    /// current address forward until it lands on one with no history.
    /// Returns the number of newly used addresses.
    pub async fn refresh_usage(&mut self, client: &BlockchainClient) -> Result<usize> {
        let stats = client.stats_for(&self.record.address_strings()).await?;
        let used: HashSet<String> = stats.into_iter().filter(|s| s.is_used()).map(|s| s.address).collect();
        let mut flipped = self.record.mark_used(&used);
        for change in [false, true] {
            while self.record.current(change).map(|r| r.used).unwrap_or(false) {
                let next = self.record.advance(change)?.address.clone();
                if client.address_stats(&next).await?.is_used() {
                    flipped += self.record.mark_used(&HashSet::from([next]));
                }
            }
        }
        self.record.discovery_complete = true;
        info!(
            newly_used = flipped,
            receiving_index = self.record.receiving_index,
            change_index = self.record.change_index,
            "address usage refreshed"
        );
        Ok(flipped)
    }

    pub async fn balance(&self, client: &BlockchainClient) -> Result<Balance> {
        client.aggregate_balance(&self.record.address_strings()).await
    }

    pub async fn utxos(&self, client: &BlockchainClient) -> Result<Vec<Utxo>> {
        client.utxos_for(&self.record.address_strings()).await
    }

    pub async fn history(&self, client: &BlockchainClient) -> Result<Vec<TxHistoryEntry>> {
        client.history(&self.record.address_strings()).await
    }

    /// Select coins from a fresh UTXO snapshot. Change goes to the current
    /// change address.
    pub async fn plan_send(
        &self,
        client: &BlockchainClient,
        to: &str,
        amount_sat: u64,
        fee_rate: f64,
    ) -> Result<TransactionPlan> {
        let recipient = address_to_script(to, self.network())?;
        let change = address_to_script(&self.change_address()?.address, self.network())?;
        let utxos = self.utxos(client).await?;
        select_coins(&utxos, amount_sat, fee_rate, &recipient, &change)
    }

    fn master(&self) -> Result<HdNode> {
        let mnemonic = self.record.mnemonic()?;
        let seed = mnemonic.to_seed("")?;
        HdNode::master(seed.as_bytes())
    }

    /// Sign `plan` with keys re-derived from the stored seed.
    pub fn sign(&self, plan: &TransactionPlan) -> Result<SignedTransaction> {
        let master = self.master()?;
        let mut keys = HashMap::new();
        for utxo in &plan.selected_utxos {
            if keys.contains_key(&utxo.source_address) {
                continue;
            }
            let record = self
                .record
                .find(&utxo.source_address)
                .ok_or_else(|| WalletError::Signing(format!("{} is not a wallet address", utxo.source_address)))?;
            let node = master.derive_path(&record.path)?;
            keys.insert(utxo.source_address.clone(), SigningKey::from_node(&node, record.address_type)?);
        }
        sign_plan(plan, &keys, self.network())
    }

    /// Plan, sign and broadcast. The change branch moves on when change was created.
    pub async fn send(
        &mut self,
        client: &BlockchainClient,
        to: &str,
        amount_sat: u64,
        fee_rate: f64,
    ) -> Result<SignedTransaction> {
        let plan = self.plan_send(client, to, amount_sat, fee_rate).await?;
        let signed = self.sign(&plan)?;
        let txid = client.broadcast(&signed.raw_hex).await?;
        if txid != signed.txid {
            warn!(ours = %signed.txid, theirs = %txid, "explorer reported a different txid");
        }
        if plan.change_output().is_some() {
            self.record.advance(true)?;
        }
        Ok(signed)
    }

    fn watch_only_account(&self) -> Result<WatchOnlyAccount> {
        let mut account = WatchOnlyAccount::new(
            self.record.account_xpub.clone(),
            parse_fingerprint(&self.record.master_fingerprint)?,
            self.address_type(),
            self.network(),
        )?;
        account.account_path = self.record.account_path.clone();
        Ok(account)
    }

    /// Unsigned PSBT for a payment, built from the account xpub alone.
    pub async fn create_psbt(
        &self,
        client: &BlockchainClient,
        to: &str,
        amount_sat: u64,
        fee_rate: f64,
    ) -> Result<Psbt> {
        let account = self.watch_only_account()?;
        let plan = self.plan_send(client, to, amount_sat, fee_rate).await?;
        let addresses: Vec<AddressRecord> = self.record.addresses().cloned().collect();
        psbt::create_psbt(&account, &plan, &addresses)
    }

    pub fn sign_psbt(&self, psbt: &mut Psbt) -> Result<usize> {
        psbt::sign_with_master(psbt, &self.master()?)
    }

    pub fn finalize_psbt(&self, psbt: &mut Psbt) -> Result<SignedTransaction> {
        psbt::finalize_and_extract(psbt)
    }

    pub async fn broadcast_psbt(&self, client: &BlockchainClient, psbt: &mut Psbt) -> Result<SignedTransaction> {
        psbt::broadcast_psbt(client, psbt).await
    }

    pub fn psbt_details(&self, psbt: &Psbt) -> PsbtDetails {
        PsbtDetails::from_psbt(psbt, self.network())
    }
}
