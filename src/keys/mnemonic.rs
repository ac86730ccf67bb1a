//! BIP39 mnemonics. Phrase and seed bytes are wiped on drop.

use crate::error::{Result, WalletError};
use bip39::Language;
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const VALID_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

/// Ordered BIP39 word list with a valid checksum.
#[derive(Clone, PartialEq, Eq)]
pub struct Mnemonic {
    phrase: String,
}

impl Mnemonic {
    /// Fresh mnemonic of `word_count` words from the OS random source.
    pub fn generate(word_count: usize) -> Result<Self> {
        if !VALID_WORD_COUNTS.contains(&word_count) {
            return Err(WalletError::validation(format!("unsupported word count {}", word_count)));
        }
        let mut entropy = [0u8; 32];
        let len = word_count / 3 * 4;
        OsRng
            .try_fill_bytes(&mut entropy[..len])
            .map_err(|e| WalletError::EntropyUnavailable(e.to_string()))?;
        let inner = bip39::Mnemonic::from_entropy_in(Language::English, &entropy[..len])
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()));
        entropy.zeroize();
        Ok(Self { phrase: inner?.to_string() })
    }

    /// Parse and validate a phrase: word count, word list membership, checksum.
    pub fn parse(phrase: &str) -> Result<Self> {
        let count = phrase.split_whitespace().count();
        if !VALID_WORD_COUNTS.contains(&count) {
            return Err(WalletError::InvalidMnemonic(format!(
                "expected 12, 15, 18, 21 or 24 words, got {}",
                count
            )));
        }
        let normalized = phrase.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ");
        let inner = bip39::Mnemonic::parse_in_normalized(Language::English, &normalized)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Self { phrase: inner.to_string() })
    }

    pub fn from_words<S: AsRef<str>>(words: &[S]) -> Result<Self> {
        let joined = words.iter().map(|w| w.as_ref()).collect::<Vec<_>>().join(" ");
        Self::parse(&joined)
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn words(&self) -> Vec<&str> {
        self.phrase.split(' ').collect()
    }

    pub fn word_count(&self) -> usize {
        self.phrase.split(' ').count()
    }

    /// BIP39 PBKDF2-HMAC-SHA512 seed (2048 rounds).
    pub fn to_seed(&self, passphrase: &str) -> Result<Seed> {
        let inner = bip39::Mnemonic::parse_in_normalized(Language::English, &self.phrase)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Seed(inner.to_seed(passphrase)))
    }
}

impl std::fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mnemonic({} words)", self.word_count())
    }
}

impl Drop for Mnemonic {
    fn drop(&mut self) {
        self.phrase.zeroize();
    }
}

/// 64-byte BIP39 seed.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Seed([u8; 64]);

impl Seed {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// `entropy_bits` must be one of 128, 160, 192, 224, 256.
pub fn generate_mnemonic(entropy_bits: usize) -> Result<Mnemonic> {
    if entropy_bits % 32 != 0 || !(128..=256).contains(&entropy_bits) {
        return Err(WalletError::validation(format!("unsupported entropy size {} bits", entropy_bits)));
    }
    Mnemonic::generate(entropy_bits / 32 * 3)
}

pub fn validate_mnemonic<S: AsRef<str>>(words: &[S]) -> bool {
    Mnemonic::from_words(words).is_ok()
}
