//! Esplora block-explorer client.
//!
//! Every call goes through one [`AdmissionGate`] and one [`RetryContext`], so
//! the minimum spacing and the 429 penalty apply across all endpoints.
//! Multi-address operations run strictly one address at a time.

use super::clock::Clock;
use super::gate::AdmissionGate;
use super::history::{summarize, HistoryMerger};
use super::retry::{Outcome, RetryContext, RetryPolicy};
use super::transport::{HttpRequest, HttpResponse, Transport};
use super::types::{AddressInfo, AddressStats, Balance, EsploraTx, TxHistoryEntry, Utxo, UtxoEntry};
use crate::config::ClientConfig;
use crate::error::{Result, WalletError};
use crate::runtime::Shutdown;
use rand::Rng;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct BlockchainClient {
    config: ClientConfig,
    policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    gate: Arc<AdmissionGate>,
    shutdown: Option<Shutdown>,
}

impl BlockchainClient {
    /// Client over HTTPS with the real clock.
    #[cfg(feature = "native")]
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(super::transport::HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, transport, Arc::new(super::clock::TokioClock::new())))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let gate = AdmissionGate::new(clock.clone(), config.min_interval)
            .with_per_key_interval(config.per_address_interval);
        Self { policy: RetryPolicy::from_config(&config), config, transport, clock, gate: Arc::new(gate), shutdown: None }
    }

    /// Make retries and gate waits abort with `Cancelled` once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    async fn execute(&self, request: HttpRequest, key: Option<&str>) -> Result<String> {
        let ctx = RetryContext {
            policy: &self.policy,
            clock: self.clock.as_ref(),
            gate: &self.gate,
            shutdown: self.shutdown.as_ref(),
            key,
        };
        let label = request.path.clone();
        ctx.run(&label, || async {
            debug!(path = %request.path, "explorer request");
            match self.transport.send(&request).await {
                Ok(response) => classify(response),
                Err(err) => Outcome::Retryable(err),
            }
        })
        .await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: String, key: Option<&str>) -> Result<T> {
        let body = self.execute(HttpRequest::get(path.clone()), key).await?;
        serde_json::from_str(&body).map_err(|e| WalletError::network(format!("unexpected response from {}: {}", path, e), None))
    }

    pub async fn address_info(&self, address: &str) -> Result<AddressInfo> {
        self.get_json(format!("/address/{}", address), Some(address)).await
    }

    pub async fn balance(&self, address: &str) -> Result<Balance> {
        Ok(Balance::from_info(&self.address_info(address).await?))
    }

    pub async fn address_stats(&self, address: &str) -> Result<AddressStats> {
        Ok(AddressStats::from_info(&self.address_info(address).await?))
    }

    pub async fn utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        let entries: Vec<UtxoEntry> = self.get_json(format!("/address/{}/utxo", address), Some(address)).await?;
        Ok(entries.into_iter().map(|e| Utxo::from_entry(e, address)).collect())
    }

    pub async fn transactions(&self, address: &str) -> Result<Vec<EsploraTx>> {
        self.get_json(format!("/address/{}/txs", address), Some(address)).await
    }

    pub async fn mempool_transactions(&self, address: &str) -> Result<Vec<EsploraTx>> {
        self.get_json(format!("/address/{}/txs/mempool", address), Some(address)).await
    }

    /// `POST /tx` with the raw hex; returns the txid the explorer reports.
    pub async fn broadcast(&self, raw_hex: &str) -> Result<String> {
        let txid = self.execute(HttpRequest::post("/tx", raw_hex.trim()), None).await?;
        let txid = txid.trim().to_string();
        info!(txid = %txid, "transaction broadcast");
        Ok(txid)
    }

    /// Confirmation target (blocks) → fee rate (sat/vB).
    pub async fn fee_estimates(&self) -> Result<BTreeMap<u32, f64>> {
        let raw: BTreeMap<String, f64> = self.get_json("/fee-estimates".into(), None).await?;
        Ok(raw.into_iter().filter_map(|(k, v)| k.parse().ok().map(|k| (k, v))).collect())
    }

    pub async fn tx_hex(&self, txid: &str) -> Result<String> {
        Ok(self.execute(HttpRequest::get(format!("/tx/{}/hex", txid)), None).await?.trim().to_string())
    }

    async fn cooldown(&self, position: usize) -> Result<()> {
        if position == 0 {
            return Ok(());
        }
        let (min, max) = (self.config.fanout_cooldown_min.as_millis() as u64, self.config.fanout_cooldown_max.as_millis() as u64);
        let pause = if max > min { rand::thread_rng().gen_range(min..=max) } else { min };
        crate::runtime::cancellable(self.shutdown.as_ref(), async {
            self.clock.sleep(Duration::from_millis(pause)).await;
            Ok(())
        })
        .await
    }

    /// Sum of balances over `addresses`, fetched sequentially.
    pub async fn aggregate_balance(&self, addresses: &[String]) -> Result<Balance> {
        let mut total = Balance::default();
        for (i, address) in addresses.iter().enumerate() {
            self.cooldown(i).await?;
            total = total + self.balance(address).await?;
        }
        debug!(addresses = addresses.len(), confirmed = total.confirmed, unconfirmed = total.unconfirmed, "aggregate balance");
        Ok(total)
    }

    pub async fn utxos_for(&self, addresses: &[String]) -> Result<Vec<Utxo>> {
        let mut all = Vec::new();
        for (i, address) in addresses.iter().enumerate() {
            self.cooldown(i).await?;
            all.extend(self.utxos(address).await?);
        }
        Ok(all)
    }

    pub async fn stats_for(&self, addresses: &[String]) -> Result<Vec<AddressStats>> {
        let mut all = Vec::with_capacity(addresses.len());
        for (i, address) in addresses.iter().enumerate() {
            self.cooldown(i).await?;
            all.push(self.address_stats(address).await?);
        }
        Ok(all)
    }

    /// Confirmed and mempool history for the wallet owning `addresses`,
    /// deduplicated by txid, unconfirmed first then newest first.
    pub async fn history(&self, addresses: &[String]) -> Result<Vec<TxHistoryEntry>> {
        let owned: HashSet<String> = addresses.iter().cloned().collect();
        let mut merger = HistoryMerger::new();
        for (i, address) in addresses.iter().enumerate() {
            self.cooldown(i).await?;
            let pending = self.mempool_transactions(address).await?;
            let confirmed = self.transactions(address).await?;
            for tx in pending.iter().chain(confirmed.iter()) {
                merger.add(summarize(tx, &owned));
            }
        }
        debug!(entries = merger.len(), "history merged");
        Ok(merger.finish())
    }
}

/// Map a response to a retry outcome.
fn classify(response: HttpResponse) -> Outcome<String> {
    match response.status {
        s if (200..300).contains(&s) => Outcome::Success(response.body),
        429 => Outcome::RateLimited(response.retry_after),
        408 => Outcome::Retryable(WalletError::network("request timeout", Some(408))),
        s if s >= 500 => Outcome::Retryable(WalletError::network(truncate(&response.body), Some(s))),
        s => Outcome::Fatal(WalletError::network(truncate(&response.body), Some(s))),
    }
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(200) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::clock::ManualClock;
    use crate::chain::transport::ScriptedTransport;
    use serde_json::json;

    const ADDR: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";

    fn setup(config: ClientConfig) -> (BlockchainClient, Arc<ScriptedTransport>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let transport = Arc::new(ScriptedTransport::new().with_clock(clock.clone()));
        let client = BlockchainClient::with_transport(config, transport.clone(), clock.clone());
        (client, transport, clock)
    }

    fn info(address: &str, funded: u64, spent: u64) -> serde_json::Value {
        json!({
            "address": address,
            "chain_stats": {"funded_txo_sum": funded, "spent_txo_sum": spent, "tx_count": 2},
            "mempool_stats": {"funded_txo_sum": 0, "spent_txo_sum": 0, "tx_count": 0}
        })
    }

    #[test]
    fn test_classify() {
        assert!(matches!(classify(HttpResponse::ok("x")), Outcome::Success(_)));
        assert!(matches!(classify(HttpResponse::status(503, "")), Outcome::Retryable(_)));
        assert!(matches!(classify(HttpResponse::too_many_requests(None)), Outcome::RateLimited(None)));
        assert!(matches!(classify(HttpResponse::status(400, "bad")), Outcome::Fatal(_)));
    }

    #[tokio::test]
    async fn test_balance_and_stats() {
        let (client, transport, _) = setup(ClientConfig::default().without_jitter());
        transport.respond_json(&format!("/address/{}", ADDR), info(ADDR, 50_000, 20_000));
        let balance = client.balance(ADDR).await.unwrap();
        assert_eq!(balance.confirmed, 30_000);
        let stats = client.address_stats(ADDR).await.unwrap();
        assert_eq!(stats.tx_count, 2);
    }

    #[tokio::test]
    async fn test_retries_5xx_then_succeeds() {
        let (client, transport, _) = setup(ClientConfig::default().without_jitter());
        let path = format!("/address/{}/utxo", ADDR);
        transport.push(&path, HttpResponse::status(502, "bad gateway"));
        transport.push_failure(&path, "connection reset");
        transport.respond_json(&path, json!([{"txid": "11".repeat(32), "vout": 0, "value": 1500, "status": {"confirmed": true}}]));

        let utxos = client.utxos(ADDR).await.unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].source_address, ADDR);
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_penalizes_other_endpoints() {
        let (client, transport, clock) = setup(ClientConfig::default().without_jitter());
        transport.push("/fee-estimates", HttpResponse::too_many_requests(Some(Duration::from_secs(4))));
        transport.respond_json("/fee-estimates", json!({"1": 25.5, "6": 10.0, "144": 1.0}));
        transport.respond("/tx/ab/hex", HttpResponse::ok("0200"));

        let fees = client.fee_estimates().await.unwrap();
        assert_eq!(fees.get(&6), Some(&10.0));
        let hex = client.tx_hex("ab").await.unwrap();
        assert_eq!(hex, "0200");

        let times: Vec<_> = transport.requests().iter().map(|r| r.at).collect();
        assert_eq!(times.len(), 3);
        assert!(times[1] - times[0] >= Duration::from_secs(4));
        assert!(times[2] - times[1] >= Duration::from_millis(1200));
        assert!(clock.now() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let (client, transport, _) = setup(ClientConfig::default().without_jitter());
        transport.push_post("/tx", HttpResponse::status(400, "sendrawtransaction RPC error: bad-txns"));
        let err = client.broadcast("00").await.unwrap_err();
        assert!(matches!(err, WalletError::Network { status: Some(400), .. }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_aggregate_balance_is_sequential() {
        let (client, transport, _) = setup(ClientConfig::default());
        let addresses: Vec<String> = (0..3).map(|i| format!("addr{}", i)).collect();
        for (i, a) in addresses.iter().enumerate() {
            transport.respond_json(&format!("/address/{}", a), info(a, 1000 * (i as u64 + 1), 0));
        }
        let total = client.aggregate_balance(&addresses).await.unwrap();
        assert_eq!(total.confirmed, 6000);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        for pair in requests.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_millis(1200));
        }
    }

    #[tokio::test]
    async fn test_history_merges_across_addresses() {
        let (client, transport, _) = setup(ClientConfig::default().without_jitter());
        let a = "mine_a".to_string();
        let b = "mine_b".to_string();
        let shared = json!({
            "txid": "aa", "fee": 150,
            "vin": [{"txid": "00", "vout": 0, "prevout": {"scriptpubkey_address": "mine_a", "value": 10_000}}],
            "vout": [{"scriptpubkey_address": "them", "value": 4_000}, {"scriptpubkey_address": "mine_b", "value": 5_850}],
            "status": {"confirmed": true, "block_height": 10, "block_time": 100}
        });
        let pending = json!({
            "txid": "bb", "fee": 200,
            "vin": [{"txid": "01", "vout": 1, "prevout": {"scriptpubkey_address": "them", "value": 9_000}}],
            "vout": [{"scriptpubkey_address": "mine_b", "value": 8_800}],
            "status": {"confirmed": false}
        });
        transport.respond_json("/address/mine_a/txs", json!([shared]));
        transport.respond_json("/address/mine_a/txs/mempool", json!([]));
        transport.respond_json("/address/mine_b/txs", json!([shared]));
        transport.respond_json("/address/mine_b/txs/mempool", json!([pending]));

        let history = client.history(&[a, b]).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].txid, "bb");
        assert!(!history[0].confirmed);
        assert_eq!(history[1].amount_sat, 4_150);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_backoff() {
        let (client, transport, _) = setup(ClientConfig::default().without_jitter());
        let shutdown = Shutdown::new();
        let client = client.with_shutdown(shutdown.clone());
        shutdown.trigger().await;
        transport.respond("/fee-estimates", HttpResponse::status(503, ""));
        assert!(matches!(client.fee_estimates().await, Err(WalletError::Cancelled)));
        assert!(transport.requests().is_empty());
    }
}
