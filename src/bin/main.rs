//! Beewallet CLI - the engine behind a command line
//!
//! Keys and addresses:
//!   beewallet generate [--words 24]           → {"mnemonic": "..."}
//!   beewallet init --mnemonic "<words>"       → creates the wallet record
//!   beewallet import-xpub <zpub> --fingerprint 73c5da0a
//!   beewallet address [--change] [--new]      → {"address": "bc1q...", "path": ...}
//!
//! Chain and spending:
//!   beewallet sync | balance | utxos | history
//!   beewallet send --to <addr> --amount <sat> [--fee-rate <sat/vB>]
//!
//! PSBT (watch-only machine ↔ signing machine):
//!   beewallet psbt-create --to <addr> --amount <sat>   → base64
//!   beewallet psbt-sign <base64> → psbt-finalize <base64> → psbt-broadcast <base64>
//!
//! Configuration: flags, then BEEWALLET_* env vars, then `.env` in the working dir.
//! Output is JSON (pretty on a TTY). Errors go to stderr as
//! `{"error": "...", "kind": "..."}` with exit code 1.

use anyhow::{anyhow, bail, Context};
use beewallet_engine::encoding::KeyPrefix;
use beewallet_engine::logging::init_logging;
use beewallet_engine::psbt::Psbt;
use beewallet_engine::{
    convert_extended_key, install_signal_handlers, validate_mnemonic, AddressType, BlockchainClient, EngineConfig,
    FileStore, Mnemonic, Network, Wallet, WalletError,
};
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use tracing::debug;

/// Confirmation target used when `--fee-rate` is absent.
const DEFAULT_FEE_TARGET: u32 = 6;

fn main() {
    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);
    init_logging();

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("beewallet {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("generate") => cmd_generate(&opts),
        Some("validate") => cmd_validate(&opts),
        Some("convert") => cmd_convert(&opts),
        Some("init") => cmd_init(&opts),
        Some("import-xpub") => cmd_import_xpub(&opts),
        Some("address") => cmd_address(&opts),
        Some("psbt-details") => cmd_psbt_details(&opts),
        Some("psbt-sign") => cmd_psbt_sign(&opts),
        Some("psbt-finalize") => cmd_psbt_finalize(&opts),
        Some(cmd @ ("sync" | "balance" | "utxos" | "history" | "plan" | "send" | "psbt-create" | "psbt-broadcast")) => {
            run_online(cmd, &opts)
        }
        Some(cmd) => Err(anyhow!(WalletError::validation(format!("Unknown command: {}", cmd)))),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = opts.pretty || std::io::stdout().is_terminal();
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            let kind = e.downcast_ref::<WalletError>().map(|w| w.kind().as_str()).unwrap_or("validation");
            let err = json!({"error": format!("{:#}", e), "kind": kind});
            eprintln!("{}", render(&err, pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    positional: Vec<String>,
    mnemonic: Option<String>,
    network: Option<String>,
    address_type: Option<String>,
    api_url: Option<String>,
    data_dir: Option<String>,
    fingerprint: Option<String>,
    to: Option<String>,
    amount: Option<String>,
    fee_rate: Option<String>,
    target: Option<String>,
    words: Option<String>,
    change: bool,
    new: bool,
    force: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        // Load .env file if present
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"');
                    if !value.is_empty() && env::var(key.trim()).is_err() {
                        env::set_var(key.trim(), value);
                    }
                }
            }
        }

        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            let value = args.get(i + 1).cloned();
            let mut takes_value = true;
            match arg.as_str() {
                "--mnemonic" | "-m" => opts.mnemonic = value,
                "--network" | "-n" => opts.network = value,
                "--type" | "-t" => opts.address_type = value,
                "--api-url" => opts.api_url = value,
                "--data-dir" | "-d" => opts.data_dir = value,
                "--fingerprint" | "-f" => opts.fingerprint = value,
                "--to" => opts.to = value,
                "--amount" => opts.amount = value,
                "--fee-rate" => opts.fee_rate = value,
                "--target" => opts.target = value,
                "--words" | "-w" => opts.words = value,
                _ => {
                    takes_value = false;
                    match arg.as_str() {
                        "--help" | "-h" => opts.help = true,
                        "--version" | "-V" => opts.version = true,
                        "--pretty" => opts.pretty = true,
                        "--change" => opts.change = true,
                        "--new" => opts.new = true,
                        "--force" => opts.force = true,
                        _ if !arg.starts_with('-') => positional.push(arg.clone()),
                        _ => {} // Ignore unknown flags
                    }
                }
            }
            i += if takes_value { 2 } else { 1 };
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        opts.positional = positional;

        // Seed phrase from env (lower priority than CLI args)
        if opts.mnemonic.is_none() {
            opts.mnemonic = env::var("BEEWALLET_MNEMONIC").ok().filter(|s| !s.trim().is_empty());
        }

        opts
    }

    fn arg(&self, position: usize, usage: &str) -> anyhow::Result<&str> {
        self.positional
            .get(position)
            .map(String::as_str)
            .ok_or_else(|| anyhow!(WalletError::validation(format!("usage: beewallet {}", usage))))
    }

    /// Env-derived config with flags layered on top.
    fn config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = EngineConfig::from_env()?;
        if let Some(raw) = &self.network {
            let network = Network::from_str(raw)
                .ok_or_else(|| WalletError::validation(format!("unknown network '{}'", raw)))?;
            config = config.with_network(network);
        }
        if let Some(raw) = &self.address_type {
            config = config.with_address_type(raw.parse::<AddressType>()?);
        }
        if let Some(url) = &self.api_url {
            config = config.with_api_url(url.as_str());
        }
        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir.as_str());
        }
        Ok(config)
    }

    fn payment(&self) -> anyhow::Result<(String, u64)> {
        let to = self.to.clone().ok_or_else(|| WalletError::validation("--to <address> is required"))?;
        let amount = self
            .amount
            .as_deref()
            .ok_or_else(|| WalletError::validation("--amount <sat> is required"))?
            .parse::<u64>()
            .map_err(|e| WalletError::validation(format!("--amount: {}", e)))?;
        Ok((to, amount))
    }
}

fn print_usage() {
    println!(
        r#"beewallet - self-custodial Bitcoin HD wallet

USAGE:
    beewallet <command> [args] [options]

OFFLINE COMMANDS:
    generate [--words N]            New BIP39 mnemonic (12, 15, 18, 21 or 24 words)
    validate <words...>             Check word list and checksum
    convert <key> --to <prefix>     Re-encode an extended key (xpub, ypub, zpub, tpub, ...)
    init --mnemonic <words>         Create a wallet from a seed phrase
    import-xpub <key> --fingerprint <hex>
                                    Create a watch-only wallet
    address [--change] [--new]      Current (or next) receive / change address
    psbt-details <base64>           Decode a PSBT for review
    psbt-sign <base64>              Sign with the wallet seed
    psbt-finalize <base64>          Finalize and extract the raw transaction

ONLINE COMMANDS:
    sync                            Mark used addresses, advance past them
    balance                         Confirmed and unconfirmed balance
    utxos                           Spendable outputs
    history                         Transaction history, newest first
    plan --to <addr> --amount <sat> Coin selection only, nothing signed
    send --to <addr> --amount <sat> Sign and broadcast
    psbt-create --to <addr> --amount <sat>
                                    Unsigned PSBT from the account xpub
    psbt-broadcast <base64>         Finalize, extract and broadcast

OPTIONS:
    --network, -n <net>             bitcoin|testnet|signet|regtest (env: BEEWALLET_NETWORK)
    --type, -t <type>               legacy|segwit|bech32 (env: BEEWALLET_ADDRESS_TYPE)
    --api-url <url>                 Esplora base URL (env: BEEWALLET_API_URL)
    --data-dir, -d <path>           Wallet data directory (env: BEEWALLET_DATA_DIR)
    --fee-rate <sat/vB>             Fee rate; default is the explorer's 6-block estimate
    --target <blocks>               Confirmation target for the fee estimate
    --force                         Overwrite an existing wallet on init / import-xpub
    --pretty                        Pretty-print JSON
    --version, -V                   Print version

EXAMPLES:
    beewallet init --network testnet --mnemonic "abandon ... about"
    beewallet address --new
    beewallet balance | jq .total
    beewallet send --to tb1q... --amount 25000 --fee-rate 2
"#
    );
}

fn open_store(config: &EngineConfig) -> anyhow::Result<FileStore> {
    let dir = config
        .resolve_data_dir()
        .ok_or_else(|| WalletError::Storage("no data directory, pass --data-dir".into()))?;
    debug!(dir = %dir.display(), "wallet store");
    Ok(FileStore::new(dir))
}

fn load_wallet(opts: &ParsedArgs) -> anyhow::Result<(Wallet, FileStore)> {
    let config = opts.config()?;
    let store = open_store(&config)?;
    let wallet = Wallet::load(config, &store)?
        .ok_or_else(|| WalletError::Storage("no wallet yet, run 'beewallet init' or 'beewallet import-xpub'".into()))?;
    Ok((wallet, store))
}

fn store_new_wallet(wallet: &Wallet, store: &FileStore, force: bool) -> anyhow::Result<()> {
    if !force && Wallet::load(wallet.config().clone(), store).ok().flatten().is_some() {
        bail!(WalletError::Storage(format!(
            "a wallet already exists in {}, pass --force to replace it",
            store.root().display()
        )));
    }
    wallet.save(store)?;
    Ok(())
}

fn wallet_summary(wallet: &Wallet) -> anyhow::Result<Value> {
    let record = wallet.record();
    Ok(json!({
        "mode": record.mode,
        "network": wallet.network().as_str(),
        "addressType": wallet.address_type(),
        "accountXpub": record.account_xpub,
        "masterFingerprint": record.master_fingerprint,
        "accountPath": record.account_path,
        "receiveAddress": wallet.receive_address()?.address,
    }))
}

fn cmd_generate(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let words = match &opts.words {
        Some(raw) => raw.parse::<usize>().map_err(|e| WalletError::validation(format!("--words: {}", e)))?,
        None => 12,
    };
    let mnemonic = Mnemonic::generate(words)?;
    Ok(json!({"mnemonic": mnemonic.phrase(), "words": mnemonic.word_count()}))
}

fn cmd_validate(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let words: Vec<&str> = opts.positional.iter().flat_map(|p| p.split_whitespace()).collect();
    Ok(json!({"valid": validate_mnemonic(&words), "words": words.len()}))
}

fn cmd_convert(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let key = opts.arg(0, "convert <key> --to <prefix>")?;
    let target = opts.to.as_deref().ok_or_else(|| WalletError::validation("--to <prefix> is required"))?;
    let prefix = KeyPrefix::parse(target)
        .ok_or_else(|| WalletError::InvalidAccountKey(format!("unknown key prefix '{}'", target)))?;
    Ok(json!({"key": convert_extended_key(key, prefix)?, "prefix": prefix.as_str()}))
}

fn cmd_init(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let phrase = opts.mnemonic.as_deref().ok_or_else(|| WalletError::validation("--mnemonic <words> is required"))?;
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let config = opts.config()?;
    let store = open_store(&config)?;
    let wallet = Wallet::from_mnemonic(config, &words)?;
    store_new_wallet(&wallet, &store, opts.force)?;
    wallet_summary(&wallet)
}

fn cmd_import_xpub(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let key = opts.arg(0, "import-xpub <key> --fingerprint <hex>")?;
    let fingerprint = opts
        .fingerprint
        .as_deref()
        .ok_or_else(|| WalletError::validation("--fingerprint <hex> is required"))?;
    let config = opts.config()?;
    let store = open_store(&config)?;
    let wallet = Wallet::watch_only(config, key, fingerprint)?;
    store_new_wallet(&wallet, &store, opts.force)?;
    wallet_summary(&wallet)
}

fn cmd_address(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (mut wallet, store) = load_wallet(opts)?;
    let record = match (opts.new, opts.change) {
        (true, false) => wallet.next_receive_address()?.clone(),
        (true, true) => wallet.next_change_address()?.clone(),
        (false, false) => wallet.receive_address()?.clone(),
        (false, true) => wallet.change_address()?.clone(),
    };
    if opts.new {
        wallet.save(&store)?;
    }
    Ok(serde_json::to_value(record)?)
}

fn cmd_psbt_details(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let encoded = opts.arg(0, "psbt-details <base64>")?;
    let network = opts.config()?.network;
    Ok(serde_json::to_value(beewallet_engine::parse_psbt_details(encoded, network)?)?)
}

fn cmd_psbt_sign(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (wallet, _) = load_wallet(opts)?;
    let mut psbt = Psbt::from_base64(opts.arg(0, "psbt-sign <base64>")?)?;
    let signed = wallet.sign_psbt(&mut psbt)?;
    Ok(json!({
        "psbt": psbt.to_base64(),
        "signedInputs": signed,
        "details": wallet.psbt_details(&psbt),
    }))
}

fn cmd_psbt_finalize(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (wallet, _) = load_wallet(opts)?;
    let mut psbt = Psbt::from_base64(opts.arg(0, "psbt-finalize <base64>")?)?;
    let transaction = wallet.finalize_psbt(&mut psbt)?;
    Ok(json!({"psbt": psbt.to_base64(), "transaction": transaction}))
}

/// Commands that talk to the block explorer share one runtime, one client
/// and a Ctrl+C handler that cancels in-flight requests.
fn run_online(command: &str, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let (mut wallet, store) = load_wallet(opts)?;
    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    rt.block_on(online(command, opts, &mut wallet, &store))
}

async fn online(command: &str, opts: &ParsedArgs, wallet: &mut Wallet, store: &FileStore) -> anyhow::Result<Value> {
    let shutdown = install_signal_handlers();
    let client = BlockchainClient::new(wallet.config().client.clone())?.with_shutdown(shutdown);

    match command {
        "sync" => {
            let newly_used = wallet.refresh_usage(&client).await?;
            wallet.save(store)?;
            Ok(json!({
                "newlyUsed": newly_used,
                "receiveAddress": wallet.receive_address()?.address,
                "changeAddress": wallet.change_address()?.address,
            }))
        }
        "balance" => {
            let balance = wallet.balance(&client).await?;
            Ok(json!({
                "confirmed": balance.confirmed,
                "unconfirmed": balance.unconfirmed,
                "total": balance.total(),
            }))
        }
        "utxos" => Ok(serde_json::to_value(wallet.utxos(&client).await?)?),
        "history" => {
            let history = wallet.history(&client).await?;
            Ok(json!({"count": history.len(), "transactions": history}))
        }
        "plan" => {
            let (to, amount) = opts.payment()?;
            let fee_rate = fee_rate(opts, &client).await?;
            Ok(serde_json::to_value(wallet.plan_send(&client, &to, amount, fee_rate).await?)?)
        }
        "send" => {
            let (to, amount) = opts.payment()?;
            let fee_rate = fee_rate(opts, &client).await?;
            let sent = wallet.send(&client, &to, amount, fee_rate).await?;
            wallet.save(store)?;
            Ok(serde_json::to_value(sent)?)
        }
        "psbt-create" => {
            let (to, amount) = opts.payment()?;
            let fee_rate = fee_rate(opts, &client).await?;
            let psbt = wallet.create_psbt(&client, &to, amount, fee_rate).await?;
            Ok(json!({"psbt": psbt.to_base64(), "details": wallet.psbt_details(&psbt)}))
        }
        "psbt-broadcast" => {
            let mut psbt = Psbt::from_base64(opts.arg(0, "psbt-broadcast <base64>")?)?;
            Ok(serde_json::to_value(wallet.broadcast_psbt(&client, &mut psbt).await?)?)
        }
        other => bail!(WalletError::validation(format!("Unknown command: {}", other))),
    }
}

/// `--fee-rate` if given, otherwise the explorer's estimate for `--target` blocks.
async fn fee_rate(opts: &ParsedArgs, client: &BlockchainClient) -> anyhow::Result<f64> {
    if let Some(raw) = &opts.fee_rate {
        return Ok(raw.parse::<f64>().map_err(|e| WalletError::validation(format!("--fee-rate: {}", e)))?);
    }
    let target = match &opts.target {
        Some(raw) => raw.parse::<u32>().map_err(|e| WalletError::validation(format!("--target: {}", e)))?,
        None => DEFAULT_FEE_TARGET,
    };
    let estimates = client.fee_estimates().await?;
    // Nearest target at or above the requested one, else the slowest available
    let rate = estimates
        .range(target..)
        .next()
        .or_else(|| estimates.iter().next_back())
        .map(|(_, rate)| *rate)
        .ok_or_else(|| WalletError::network("explorer returned no fee estimates", None))?;
    debug!(target, rate, "fee rate from estimates");
    Ok(rate.max(1.0))
}
