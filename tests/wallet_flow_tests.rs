//! Wallet flow tests: persistence, explorer sync, spending and the
//! watch-only / signer PSBT round trip, all against a scripted explorer.
//!
//! These tests verify:
//! 1. Wallet records survive a FileStore round trip under an env-driven config
//! 2. Usage refresh and sends go through the rate gate in order
//! 3. A PSBT built from an xpub is signable by the seed and parses in rust-bitcoin
//! 4. Engine errors carry the kind the UI branches on

use base64::Engine as _;
use beewallet_engine::chain::{HttpResponse, ManualClock, ScriptedTransport};
use beewallet_engine::{
    BlockchainClient, ClientConfig, EngineConfig, ErrorKind, FileStore, KeyValueStore, Network, Psbt, PsbtState,
    Wallet, WalletError,
};
use once_cell::sync::Lazy;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner())
}

// Test mnemonic (well-known, never use with real funds)
const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const RECEIVE_0: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
const RECEIVE_1: &str = "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g";
const CHANGE_0: &str = "bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el";
const EXTERNAL: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

fn seed_wallet() -> Wallet {
    let words: Vec<&str> = TEST_MNEMONIC.split_whitespace().collect();
    Wallet::from_mnemonic(EngineConfig::new(), &words).expect("wallet")
}

fn scripted(config: ClientConfig) -> (BlockchainClient, Arc<ScriptedTransport>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let transport = Arc::new(ScriptedTransport::new().with_clock(clock.clone()));
    (BlockchainClient::with_transport(config, transport.clone(), clock.clone()), transport, clock)
}

fn stats(address: &str, tx_count: u32) -> serde_json::Value {
    json!({
        "address": address,
        "chain_stats": {"funded_txo_sum": 0, "spent_txo_sum": 0, "tx_count": tx_count},
        "mempool_stats": {"funded_txo_sum": 0, "spent_txo_sum": 0, "tx_count": 0}
    })
}

fn utxo(txid_byte: &str, vout: u32, value: u64) -> serde_json::Value {
    json!({"txid": txid_byte.repeat(32), "vout": vout, "value": value, "status": {"confirmed": true, "block_height": 800_000}})
}

/// Test: record persists through FileStore at the env-configured data dir
#[test]
fn wallet_persists_under_env_data_dir() {
    let _guard = lock_env();
    let dir = TempDir::new().expect("tempdir");
    std::env::set_var("BEEWALLET_DATA_DIR", dir.path());
    std::env::set_var("BEEWALLET_NETWORK", "bitcoin");
    let config = EngineConfig::from_env().expect("config");
    std::env::remove_var("BEEWALLET_DATA_DIR");
    std::env::remove_var("BEEWALLET_NETWORK");

    let store = FileStore::new(config.resolve_data_dir().expect("data dir"));
    assert_eq!(store.root(), dir.path());

    let words: Vec<&str> = TEST_MNEMONIC.split_whitespace().collect();
    let mut wallet = Wallet::from_mnemonic(config.clone(), &words).expect("wallet");
    wallet.next_receive_address().expect("next");
    wallet.save(&store).expect("save");

    let raw = store.get("wallet-data").expect("get").expect("present");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["mode"], "full");
    assert_eq!(value["receivingIndex"], 1);
    assert_eq!(value["receivingAddresses"][1]["address"], RECEIVE_1);

    let restored = Wallet::load(config, &store).expect("load").expect("present");
    assert_eq!(restored.receive_address().unwrap().address, RECEIVE_1);
    assert_eq!(restored.record(), wallet.record());
}

/// Test: a watch-only record never contains a seed phrase on disk
#[test]
fn watch_only_record_has_no_seed() {
    let dir = TempDir::new().expect("tempdir");
    let store = FileStore::new(dir.path());
    let seed = seed_wallet();
    let watcher =
        Wallet::watch_only(EngineConfig::new(), &seed.record().account_xpub, &seed.record().master_fingerprint)
            .expect("watch-only");
    watcher.save(&store).expect("save");

    let raw = store.get("wallet-data").expect("get").expect("present");
    assert!(!raw.contains("seedPhrase"));
    assert!(!raw.contains("abandon"));
    assert!(raw.contains("\"mode\":\"watch_only\""));
}

/// Test: refresh, then send; every explorer call respects the global gap
#[tokio::test]
async fn refresh_then_send_is_rate_gated() {
    let mut wallet = seed_wallet();
    let (client, transport, _) = scripted(ClientConfig::default().without_jitter());

    transport.respond_json(&format!("/address/{}", RECEIVE_0), stats(RECEIVE_0, 2));
    transport.respond_json(&format!("/address/{}", CHANGE_0), stats(CHANGE_0, 0));
    transport.respond_json(&format!("/address/{}", RECEIVE_1), stats(RECEIVE_1, 0));
    assert_eq!(wallet.refresh_usage(&client).await.unwrap(), 1);
    assert_eq!(wallet.receive_address().unwrap().address, RECEIVE_1);

    transport.respond_json(&format!("/address/{}/utxo", RECEIVE_0), json!([utxo("a1", 0, 30_000), utxo("a2", 1, 12_000)]));
    transport.respond_json(&format!("/address/{}/utxo", RECEIVE_1), json!([]));
    transport.respond_json(&format!("/address/{}/utxo", CHANGE_0), json!([]));

    let plan = wallet.plan_send(&client, EXTERNAL, 35_000, 3.0).await.unwrap();
    assert_eq!(plan.selected_utxos.len(), 2);
    let expected = wallet.sign(&plan).unwrap();
    transport.push_post("/tx", HttpResponse::ok(format!("{}\n", expected.txid)));

    let sent = wallet.send(&client, EXTERNAL, 35_000, 3.0).await.unwrap();
    assert_eq!(sent.txid, expected.txid);
    assert_eq!(wallet.change_address().unwrap().index, 1);

    let requests = transport.requests();
    for pair in requests.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(1200));
    }
    let last = requests.last().unwrap();
    assert_eq!(last.request.path, "/tx");
    assert_eq!(last.request.body.as_deref(), Some(sent.raw_hex.as_str()));

    let oracle: bitcoin::Transaction =
        bitcoin::consensus::deserialize(&hex::decode(&sent.raw_hex).unwrap()).unwrap();
    assert_eq!(oracle.compute_txid().to_string(), sent.txid);
    assert_eq!(oracle.input.len(), 2);
    assert!(oracle.input.iter().all(|i| i.witness.len() == 2 && i.script_sig.is_empty()));
    assert_eq!(oracle.output[0].value.to_sat(), 35_000);
}

/// Test: explorer 429 with Retry-After is honoured before the next attempt
#[tokio::test]
async fn rate_limited_utxo_fetch_waits_and_recovers() {
    let wallet = seed_wallet();
    let (client, transport, clock) = scripted(ClientConfig::default().without_jitter());
    let path = format!("/address/{}/utxo", RECEIVE_0);
    transport.push(&path, HttpResponse::too_many_requests(Some(Duration::from_secs(4))));
    transport.respond_json(&path, json!([utxo("b1", 0, 5_000)]));
    transport.respond_json(&format!("/address/{}/utxo", CHANGE_0), json!([]));

    let utxos = wallet.utxos(&client).await.unwrap();
    assert_eq!(utxos.len(), 1);
    assert_eq!(utxos[0].source_address, RECEIVE_0);
    assert!(clock.total_slept() >= Duration::from_secs(4));
    assert_eq!(transport.paths().iter().filter(|p| **p == path).count(), 2);
}

/// Test: xpub machine creates, seed machine signs, xpub machine finalizes
#[tokio::test]
async fn psbt_round_trip_between_machines() {
    let signer = seed_wallet();
    let watcher =
        Wallet::watch_only(EngineConfig::new(), &signer.record().account_xpub, &signer.record().master_fingerprint)
            .expect("watch-only");
    let (client, transport, _) = scripted(ClientConfig::default().without_jitter());
    transport.respond_json(&format!("/address/{}/utxo", RECEIVE_0), json!([utxo("c1", 3, 80_000)]));
    transport.respond_json(&format!("/address/{}/utxo", CHANGE_0), json!([]));

    let unsigned = watcher.create_psbt(&client, EXTERNAL, 50_000, 2.0).await.unwrap();
    let text = unsigned.to_base64();

    // rust-bitcoin reads what we wrote
    let bytes = base64::engine::general_purpose::STANDARD.decode(&text).unwrap();
    let oracle = bitcoin::Psbt::deserialize(&bytes).unwrap();
    assert_eq!(oracle.unsigned_tx.compute_txid().to_string(), unsigned.txid());
    assert!(oracle.inputs[0].witness_utxo.is_some());
    assert_eq!(oracle.inputs[0].bip32_derivation.len(), 1);

    let mut on_signer = Psbt::from_base64(&text).unwrap();
    assert_eq!(signer.sign_psbt(&mut on_signer).unwrap(), 1);
    let signed_text = on_signer.to_base64();

    let mut on_watcher = Psbt::from_base64(&signed_text).unwrap();
    let details = watcher.psbt_details(&on_watcher);
    assert_eq!(details.state, PsbtState::PartiallySigned);
    assert!(details.inputs.iter().all(|i| i.signed));
    assert!(details.outputs.iter().any(|o| o.is_change));

    transport.push_post("/tx", HttpResponse::ok(on_watcher.txid()));
    let sent = watcher.broadcast_psbt(&client, &mut on_watcher).await.unwrap();
    assert_eq!(on_watcher.state(), PsbtState::Finalized);

    // rust-bitcoin extracts the same transaction from the finalized PSBT
    let bytes = base64::engine::general_purpose::STANDARD.decode(on_watcher.to_base64()).unwrap();
    let extracted = bitcoin::Psbt::deserialize(&bytes).unwrap().extract_tx().unwrap();
    assert_eq!(extracted.compute_txid().to_string(), sent.txid);
    assert_eq!(sent.fee_sat, details.fee_sat.unwrap());
}

/// Test: errors map to the coarse kinds the UI shows
#[tokio::test]
async fn errors_carry_their_kind() {
    let wallet = seed_wallet();
    let (client, transport, _) = scripted(ClientConfig::default().without_jitter());
    transport.respond_json(&format!("/address/{}/utxo", RECEIVE_0), json!([utxo("d1", 0, 1_000)]));
    transport.respond_json(&format!("/address/{}/utxo", CHANGE_0), json!([]));

    let err = wallet.plan_send(&client, EXTERNAL, 50_000, 1.0).await.unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds { available: 1_000, .. }));
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

    let err = wallet.plan_send(&client, "tb1q6rz28mcfaxtmd6v789l9rrlrusdprr9pqcpvkl", 500, 1.0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let watcher = Wallet::watch_only(EngineConfig::new(), &wallet.record().account_xpub, "73c5da0a").unwrap();
    assert_eq!(watcher.network(), Network::Bitcoin);
    let plan = wallet.plan_send(&client, EXTERNAL, 600, 1.0).await.unwrap();
    assert_eq!(watcher.sign(&plan).unwrap_err().kind(), ErrorKind::Signing);
}
