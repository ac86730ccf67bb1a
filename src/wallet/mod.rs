//! Wallet - persisted record plus the facade the UI talks to.
//!
//! ```text
//! Wallet ──save/load──► WalletRecord ──to_json──► KeyValueStore ("wallet-data")
//!   │                        │                        ├── MemoryStore
//!   │                        │ receiving / change     └── FileStore (<data_dir>/wallet-data.json)
//!   │                        ▼ AddressRecord lists
//!   ├── refresh_usage / balance / utxos / history ──► BlockchainClient
//!   ├── plan_send ──► select_coins ──► sign ──► send
//!   └── create_psbt (xpub only) ──► sign_psbt (seed) ──► finalize / broadcast
//! ```
//!
//! A full wallet stores its seed phrase; a watch-only wallet stores only the
//! account xpub and master fingerprint and can build but never sign.

mod engine;
pub mod record;
pub mod store;

pub use engine::Wallet;
pub use record::{WalletMode, WalletRecord};
pub use store::{FileStore, KeyValueStore, MemoryStore, WALLET_DATA_KEY};
