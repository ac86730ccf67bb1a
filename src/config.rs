//! Engine configuration - passed from higher layers (UI shell, CLI).

use crate::address::AddressType;
use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network { #[default] Bitcoin, Testnet, Signet, Regtest }

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self { Network::Bitcoin => "bitcoin", Network::Testnet => "testnet", Network::Signet => "signet", Network::Regtest => "regtest" }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bitcoin" | "mainnet" | "main" => Some(Network::Bitcoin),
            "testnet" | "test" => Some(Network::Testnet),
            "signet" => Some(Network::Signet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }

    pub fn is_mainnet(&self) -> bool { matches!(self, Network::Bitcoin) }

    /// BIP44 coin type: 0 on mainnet, 1 on every test network.
    pub fn coin_type(&self) -> u32 { if self.is_mainnet() { 0 } else { 1 } }

    pub fn p2pkh_prefix(&self) -> u8 { if self.is_mainnet() { 0x00 } else { 0x6f } }

    pub fn p2sh_prefix(&self) -> u8 { if self.is_mainnet() { 0x05 } else { 0xc4 } }

    pub fn bech32_hrp(&self) -> &'static str {
        match self { Network::Bitcoin => "bc", Network::Testnet | Network::Signet => "tb", Network::Regtest => "bcrt" }
    }

    fn default_api_url(&self) -> &'static str {
        match self {
            Network::Bitcoin => "https://blockstream.info/api",
            Network::Testnet => "https://blockstream.info/testnet/api",
            Network::Signet => "https://mempool.space/signet/api",
            Network::Regtest => "http://127.0.0.1:3002",
        }
    }
}

/// Block explorer client tuning. Defaults match public Esplora throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Minimum spacing between any two outbound calls.
    pub min_interval: Duration,
    /// Extra spacing between calls for the same address. Zero keeps only the global gate live.
    pub per_address_interval: Duration,
    pub max_attempts: u32,
    pub max_rate_limited: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub rate_limit_cap: Duration,
    pub jitter_max: Duration,
    pub fanout_cooldown_min: Duration,
    pub fanout_cooldown_max: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self { Self::for_network(Network::Bitcoin) }
}

impl ClientConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            base_url: network.default_api_url().into(),
            user_agent: format!("beewallet-engine/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            min_interval: Duration::from_millis(1200),
            per_address_interval: Duration::ZERO,
            max_attempts: 3,
            max_rate_limited: 5,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(8000),
            rate_limit_cap: Duration::from_millis(5000),
            jitter_max: Duration::from_millis(400),
            fanout_cooldown_min: Duration::from_millis(50),
            fanout_cooldown_max: Duration::from_millis(150),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self { self.base_url = url.into().trim_end_matches('/').to_string(); self }
    pub fn with_min_interval(mut self, interval: Duration) -> Self { self.min_interval = interval; self }
    pub fn with_timeouts(mut self, request: Duration, connect: Duration) -> Self { self.request_timeout = request; self.connect_timeout = connect; self }
    pub fn with_attempts(mut self, max_attempts: u32, max_rate_limited: u32) -> Self { self.max_attempts = max_attempts; self.max_rate_limited = max_rate_limited; self }
    /// No jitter or fan-out cooldown; used where timing must be exact.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_max = Duration::ZERO;
        self.fanout_cooldown_min = Duration::ZERO;
        self.fanout_cooldown_max = Duration::ZERO;
        self
    }
}

/// Engine configuration. Higher layers construct this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub network: Network,
    pub address_type: AddressType,
    pub client: ClientConfig,
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { network: Network::Bitcoin, address_type: AddressType::Bech32, client: ClientConfig::default(), data_dir: None }
    }
}

impl EngineConfig {
    pub fn new() -> Self { Self::default() }
    pub fn mainnet() -> Self { Self::default() }
    pub fn testnet() -> Self { Self::new().with_network(Network::Testnet) }

    /// Switching network also resets the explorer URL to that network's default.
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self.client.base_url = network.default_api_url().into();
        self
    }
    pub fn with_address_type(mut self, t: AddressType) -> Self { self.address_type = t; self }
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self { self.client = self.client.with_base_url(url); self }
    pub fn with_client(mut self, client: ClientConfig) -> Self { self.client = client; self }
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self { self.data_dir = Some(path.into()); self }

    /// Defaults overridden by `BEEWALLET_NETWORK`, `BEEWALLET_API_URL`,
    /// `BEEWALLET_ADDRESS_TYPE` and `BEEWALLET_DATA_DIR`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("BEEWALLET_NETWORK") {
            let network = Network::from_str(&value)
                .ok_or_else(|| WalletError::validation(format!("BEEWALLET_NETWORK: unknown network '{}'", value)))?;
            config = config.with_network(network);
        }
        if let Ok(value) = std::env::var("BEEWALLET_API_URL") {
            if !value.trim().is_empty() { config = config.with_api_url(value.trim()); }
        }
        if let Ok(value) = std::env::var("BEEWALLET_ADDRESS_TYPE") {
            config.address_type = value.parse()?;
        }
        if let Ok(value) = std::env::var("BEEWALLET_DATA_DIR") {
            if !value.trim().is_empty() { config.data_dir = Some(PathBuf::from(value.trim())); }
        }
        Ok(config)
    }

    /// Explicit data dir, else the platform data dir (`~/.local/share/beewallet` on Linux).
    pub fn resolve_data_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.data_dir { return Some(dir.clone()); }
        #[cfg(feature = "native")]
        { dirs::data_dir().map(|d| d.join("beewallet")) }
        #[cfg(not(feature = "native"))]
        { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing_and_prefixes() {
        assert_eq!(Network::from_str("Mainnet"), Some(Network::Bitcoin));
        assert_eq!(Network::from_str("signet"), Some(Network::Signet));
        assert_eq!(Network::from_str("litecoin"), None);
        assert_eq!(Network::Bitcoin.coin_type(), 0);
        assert_eq!(Network::Testnet.coin_type(), 1);
        assert_eq!(Network::Regtest.bech32_hrp(), "bcrt");
        assert_eq!(Network::Signet.p2sh_prefix(), 0xc4);
    }

    #[test]
    fn test_client_defaults() {
        let c = ClientConfig::default();
        assert_eq!(c.min_interval, Duration::from_millis(1200));
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.max_rate_limited, 5);
        assert_eq!(c.per_address_interval, Duration::ZERO);
        assert!(c.user_agent.starts_with("beewallet-engine/"));
    }

    #[test]
    fn test_builder_switches_url_with_network() {
        let config = EngineConfig::new().with_network(Network::Testnet).with_address_type(AddressType::Segwit);
        assert_eq!(config.client.base_url, "https://blockstream.info/testnet/api");
        assert_eq!(config.address_type, AddressType::Segwit);
        let config = config.with_api_url("http://localhost:3000/");
        assert_eq!(config.client.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = EngineConfig::testnet().with_data_dir("/tmp/bee");
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.network, Network::Testnet);
        assert_eq!(back.data_dir, Some(PathBuf::from("/tmp/bee")));
    }
}
