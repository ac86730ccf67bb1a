//! Tx - coin selection, raw serialization, sighash and signing.
//!
//! ```text
//! UTXOs ──select_coins──► TransactionPlan ──unsigned_transaction──► Transaction
//!                                                                      │ SighashCache (BIP143) / legacy
//!                                                                      ▼
//!                                   SignedTransaction ◄──verify_signed── sign_digest + Payment::unlock
//! ```

pub mod builder;
pub mod encode;
pub mod select;
pub mod sighash;
pub mod sign;

pub use builder::{sign_plan, unsigned_transaction, SignedTransaction, SigningKey};
pub use encode::{OutPoint, Transaction, TxIn, TxOut};
pub use select::{estimate_fee, estimate_vsize, select_coins, PlannedOutput, TransactionPlan, DUST_THRESHOLD};
pub use sighash::{SighashCache, SIGHASH_ALL};
pub use sign::{sign_digest, verify_signature, verify_signed};
