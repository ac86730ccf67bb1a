//! Address - script types, payment encoders and tracked address records.
//!
//! | Type | Purpose | Output script | Account key |
//! |------|---------|---------------|-------------|
//! | `legacy` | 44 | P2PKH | xpub / tpub |
//! | `segwit` | 49 | P2SH(P2WPKH) | ypub / upub |
//! | `bech32` | 84 | P2WPKH | zpub / vpub |

pub mod payment;
mod record;

pub use payment::{
    address_to_script, hash160, script_to_address, validate_address, Payment, P2pkh, P2shP2wpkh, P2wpkh, ScriptKind,
};
pub use record::AddressRecord;

use crate::config::Network;
use crate::encoding::KeyPrefix;
use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Legacy,
    Segwit,
    Bech32,
}

impl AddressType {
    pub const ALL: [AddressType; 3] = [AddressType::Legacy, AddressType::Segwit, AddressType::Bech32];

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::Legacy => "legacy",
            AddressType::Segwit => "segwit",
            AddressType::Bech32 => "bech32",
        }
    }

    pub fn purpose(&self) -> u32 {
        match self {
            AddressType::Legacy => 44,
            AddressType::Segwit => 49,
            AddressType::Bech32 => 84,
        }
    }

    /// The only place address types are mapped to their encoder.
    pub fn payment(&self) -> &'static dyn Payment {
        match self {
            AddressType::Legacy => &P2pkh,
            AddressType::Segwit => &P2shP2wpkh,
            AddressType::Bech32 => &P2wpkh,
        }
    }

    /// SLIP132 prefix used when exporting this type's account xpub.
    pub fn account_prefix(&self, network: Network) -> KeyPrefix {
        match (self, network.is_mainnet()) {
            (AddressType::Legacy, true) => KeyPrefix::Xpub,
            (AddressType::Segwit, true) => KeyPrefix::Ypub,
            (AddressType::Bech32, true) => KeyPrefix::Zpub,
            (AddressType::Legacy, false) => KeyPrefix::Tpub,
            (AddressType::Segwit, false) => KeyPrefix::Upub,
            (AddressType::Bech32, false) => KeyPrefix::Vpub,
        }
    }

    pub fn xpub_version(&self, network: Network) -> [u8; 4] {
        self.account_prefix(network).version()
    }

    /// Script type implied by a SLIP132 prefix; `xpub`/`tpub` carry no hint.
    pub fn from_prefix(prefix: KeyPrefix) -> Option<Self> {
        match prefix {
            KeyPrefix::Ypub | KeyPrefix::Yprv | KeyPrefix::Upub | KeyPrefix::Uprv => Some(AddressType::Segwit),
            KeyPrefix::Zpub | KeyPrefix::Zprv | KeyPrefix::Vpub | KeyPrefix::Vprv => Some(AddressType::Bech32),
            _ => None,
        }
    }

    /// Infer the type of a spendable single-key address.
    pub fn from_address(address: &str, network: Network) -> Result<Self> {
        let script = address_to_script(address, network)?;
        match ScriptKind::classify(&script) {
            ScriptKind::P2pkh(_) => Ok(AddressType::Legacy),
            ScriptKind::P2sh(_) => Ok(AddressType::Segwit),
            ScriptKind::P2wpkh(_) => Ok(AddressType::Bech32),
            _ => Err(WalletError::InvalidAddress(format!("{} is not a single-key address", address))),
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "p2pkh" => Ok(AddressType::Legacy),
            "segwit" | "p2sh-p2wpkh" | "nested" => Ok(AddressType::Segwit),
            "bech32" | "p2wpkh" | "native" => Ok(AddressType::Bech32),
            other => Err(WalletError::validation(format!("unknown address type '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purpose_and_prefixes() {
        assert_eq!(AddressType::Legacy.purpose(), 44);
        assert_eq!(AddressType::Segwit.purpose(), 49);
        assert_eq!(AddressType::Bech32.purpose(), 84);
        assert_eq!(AddressType::Bech32.account_prefix(Network::Bitcoin), KeyPrefix::Zpub);
        assert_eq!(AddressType::Segwit.account_prefix(Network::Testnet), KeyPrefix::Upub);
        assert_eq!(AddressType::Bech32.xpub_version(Network::Bitcoin), [0x04, 0xb2, 0x47, 0x46]);
        assert_eq!(AddressType::from_prefix(KeyPrefix::Vpub), Some(AddressType::Bech32));
        assert_eq!(AddressType::from_prefix(KeyPrefix::Xpub), None);
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("P2WPKH".parse::<AddressType>().unwrap(), AddressType::Bech32);
        assert!("taproot".parse::<AddressType>().is_err());
        assert_eq!(serde_json::to_string(&AddressType::Segwit).unwrap(), "\"segwit\"");
    }

    #[test]
    fn test_from_address() {
        let net = Network::Bitcoin;
        assert_eq!(AddressType::from_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", net).unwrap(), AddressType::Legacy);
        assert_eq!(
            AddressType::from_address("bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu", net).unwrap(),
            AddressType::Bech32
        );
        assert_eq!(AddressType::from_address("37VucYSaXLCAsxYyAPfbSi9eh4iEcbShgf", net).unwrap(), AddressType::Segwit);
    }
}
