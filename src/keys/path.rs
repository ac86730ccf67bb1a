//! Derivation paths: `m/84'/0'/0'/0/5` (`h` is accepted as a hardened marker).

use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const HARDENED: u32 = 0x8000_0000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    pub fn master() -> Self {
        Self(Vec::new())
    }

    pub fn from_indices(indices: Vec<u32>) -> Self {
        Self(indices)
    }

    /// `m/purpose'/coin'/account'`
    pub fn account(purpose: u32, coin: u32, account: u32) -> Self {
        Self(vec![purpose | HARDENED, coin | HARDENED, account | HARDENED])
    }

    pub fn child(&self, index: u32) -> Self {
        let mut next = self.0.clone();
        next.push(index);
        next.into()
    }

    pub fn extend(&self, tail: &[u32]) -> Self {
        let mut next = self.0.clone();
        next.extend_from_slice(tail);
        next.into()
    }

    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The trailing `(change, index)` pair of a full address path.
    pub fn change_and_index(&self) -> Option<(u32, u32)> {
        match self.0.as_slice() {
            [.., change, index] if !is_hardened(*change) && !is_hardened(*index) => Some((*change, *index)),
            _ => None,
        }
    }

    pub fn starts_with(&self, prefix: &DerivationPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<Vec<u32>> for DerivationPath {
    fn from(indices: Vec<u32>) -> Self {
        Self(indices)
    }
}

impl From<&DerivationPath> for bitcoin::bip32::DerivationPath {
    fn from(path: &DerivationPath) -> Self {
        path.0.iter().map(|&i| bitcoin::bip32::ChildNumber::from(i)).collect()
    }
}

pub fn is_hardened(index: u32) -> bool {
    index & HARDENED != 0
}

impl FromStr for DerivationPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('/');
        match parts.next() {
            Some("m") | Some("M") => {}
            _ => return Err(WalletError::Derivation(format!("path must start with m/: {}", s))),
        }
        let mut indices = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
                Some(d) => (d, true),
                None => (part, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| WalletError::Derivation(format!("invalid path segment '{}'", part)))?;
            if is_hardened(index) {
                return Err(WalletError::Derivation(format!("path segment out of range '{}'", part)));
            }
            indices.push(if hardened { index | HARDENED } else { index });
        }
        Ok(Self(indices))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for &index in &self.0 {
            if is_hardened(index) {
                write!(f, "/{}'", index & !HARDENED)?;
            } else {
                write!(f, "/{}", index)?;
            }
        }
        Ok(())
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
