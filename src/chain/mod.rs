//! Chain - rate-limited, retrying access to an Esplora block explorer.
//!
//! ```text
//! BlockchainClient ──► RetryContext ──► AdmissionGate ──► Transport
//!        │                 │ Outcome         │ next allowed     │ reqwest / scripted
//!        │                 ▼                 ▼ time (Mutex)     ▼
//!        └── history merge, sequential fan-out with cooldown    Clock (tokio / manual)
//! ```

pub mod client;
pub mod clock;
pub mod gate;
pub mod history;
pub mod retry;
pub mod transport;
pub mod types;

pub use client::BlockchainClient;
pub use clock::{Clock, ManualClock, TokioClock};
pub use gate::AdmissionGate;
pub use history::{merge_history, summarize, HistoryMerger};
pub use retry::{Outcome, RetryContext, RetryPolicy};
#[cfg(feature = "native")]
pub use transport::HttpTransport;
pub use transport::{HttpRequest, HttpResponse, Method, ScriptedTransport, Transport};
pub use types::{AddressStats, Balance, Direction, TxHistoryEntry, Utxo};
