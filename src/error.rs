//! Error taxonomy shared by every layer of the engine.
//!
//! Callers on the UI side only need [`WalletError::kind`] and
//! [`WalletError::retry_hint`] to decide whether to offer a retry.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("Invalid account key: {0}")]
    InvalidAccountKey(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Derivation failed: {0}")]
    Derivation(String),
    #[error("Secure random source unavailable: {0}")]
    EntropyUnavailable(String),
    #[error("Network error{}: {}", fmt_status(.status), .message)]
    Network { message: String, status: Option<u16> },
    #[error("Rate limited by block explorer, try again shortly")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("Insufficient funds: need {needed} sat, have {available} sat")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("PSBT not fully signed: {missing} input(s) missing signatures")]
    NotFullySigned { missing: usize },
    #[error("Invalid PSBT: {0}")]
    InvalidPsbt(String),
    #[error("Storage: {0}")]
    Storage(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Coarse classification surfaced to the UI collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Network,
    RateLimit,
    InsufficientFunds,
    Signing,
    PsbtState,
    Storage,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::Signing => "signing",
            ErrorKind::PsbtState => "psbt_state",
            ErrorKind::Storage => "storage",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::Validation(_)
            | WalletError::InvalidMnemonic(_)
            | WalletError::InvalidAccountKey(_)
            | WalletError::InvalidAddress(_) => ErrorKind::Validation,
            WalletError::Derivation(_) | WalletError::Signing(_) | WalletError::EntropyUnavailable(_) => ErrorKind::Signing,
            WalletError::Network { .. } => ErrorKind::Network,
            WalletError::RateLimited { .. } => ErrorKind::RateLimit,
            WalletError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            WalletError::NotFullySigned { .. } | WalletError::InvalidPsbt(_) => ErrorKind::PsbtState,
            WalletError::Storage(_) | WalletError::Json(_) => ErrorKind::Storage,
            WalletError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::RateLimit)
    }

    /// How long the caller should wait before retrying, when that is known.
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            WalletError::RateLimited { retry_after_ms: Some(ms) } => Some(Duration::from_millis(*ms)),
            WalletError::RateLimited { retry_after_ms: None } => Some(Duration::from_secs(5)),
            WalletError::Network { .. } => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        WalletError::Validation(msg.into())
    }

    pub fn network(msg: impl Into<String>, status: Option<u16>) -> Self {
        WalletError::Network { message: msg.into(), status }
    }
}

pub type Result<T> = std::result::Result<T, WalletError>;

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}
