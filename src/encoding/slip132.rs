//! SLIP-0132 extended key prefixes
//!
//! Other wallets export account keys as `ypub`/`zpub`/`upub`/`vpub` (and the
//! capitalised multisig forms). The 78-byte payload is identical across all of
//! them; only the leading 4 version bytes differ, so conversion is a decode,
//! version overwrite and re-encode.
//!
//! Reference: https://github.com/satoshilabs/slips/blob/master/slip-0132.md

use crate::encoding::base58;
use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};

pub const EXTENDED_KEY_LEN: usize = 78;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPrefix {
    Xpub,
    Xprv,
    Ypub,
    Yprv,
    Zpub,
    Zprv,
    /// Multisig P2SH-P2WSH
    YpubMultisig,
    /// Multisig P2WSH
    ZpubMultisig,
    Tpub,
    Tprv,
    Upub,
    Uprv,
    Vpub,
    Vprv,
    UpubMultisig,
    VpubMultisig,
}

const TABLE: &[(KeyPrefix, [u8; 4], &str)] = &[
    (KeyPrefix::Xpub, [0x04, 0x88, 0xb2, 0x1e], "xpub"),
    (KeyPrefix::Xprv, [0x04, 0x88, 0xad, 0xe4], "xprv"),
    (KeyPrefix::Ypub, [0x04, 0x9d, 0x7c, 0xb2], "ypub"),
    (KeyPrefix::Yprv, [0x04, 0x9d, 0x78, 0x78], "yprv"),
    (KeyPrefix::Zpub, [0x04, 0xb2, 0x47, 0x46], "zpub"),
    (KeyPrefix::Zprv, [0x04, 0xb2, 0x43, 0x0c], "zprv"),
    (KeyPrefix::YpubMultisig, [0x02, 0x95, 0xb4, 0x3f], "Ypub"),
    (KeyPrefix::ZpubMultisig, [0x02, 0xaa, 0x7e, 0xd3], "Zpub"),
    (KeyPrefix::Tpub, [0x04, 0x35, 0x87, 0xcf], "tpub"),
    (KeyPrefix::Tprv, [0x04, 0x35, 0x83, 0x94], "tprv"),
    (KeyPrefix::Upub, [0x04, 0x4a, 0x52, 0x62], "upub"),
    (KeyPrefix::Uprv, [0x04, 0x4a, 0x4e, 0x28], "uprv"),
    (KeyPrefix::Vpub, [0x04, 0x5f, 0x1c, 0xf6], "vpub"),
    (KeyPrefix::Vprv, [0x04, 0x5f, 0x18, 0xbc], "vprv"),
    (KeyPrefix::UpubMultisig, [0x02, 0x42, 0x89, 0xef], "Upub"),
    (KeyPrefix::VpubMultisig, [0x02, 0x57, 0x54, 0x83], "Vpub"),
];

impl KeyPrefix {
    pub fn version(&self) -> [u8; 4] {
        TABLE.iter().find(|(p, _, _)| p == self).map(|(_, v, _)| *v).unwrap_or([0; 4])
    }

    pub fn as_str(&self) -> &'static str {
        TABLE.iter().find(|(p, _, _)| p == self).map(|(_, _, s)| *s).unwrap_or("")
    }

    pub fn from_version(version: [u8; 4]) -> Option<Self> {
        TABLE.iter().find(|(_, v, _)| *v == version).map(|(p, _, _)| *p)
    }

    pub fn parse(name: &str) -> Option<Self> {
        TABLE.iter().find(|(_, _, s)| *s == name).map(|(p, _, _)| *p)
    }

    pub fn is_private(&self) -> bool {
        matches!(
            self,
            KeyPrefix::Xprv | KeyPrefix::Yprv | KeyPrefix::Zprv | KeyPrefix::Tprv | KeyPrefix::Uprv | KeyPrefix::Vprv
        )
    }

    pub fn is_mainnet(&self) -> bool {
        matches!(
            self,
            KeyPrefix::Xpub
                | KeyPrefix::Xprv
                | KeyPrefix::Ypub
                | KeyPrefix::Yprv
                | KeyPrefix::Zpub
                | KeyPrefix::Zprv
                | KeyPrefix::YpubMultisig
                | KeyPrefix::ZpubMultisig
        )
    }

    /// Private prefix sharing this prefix's script semantics; multisig forms have none.
    pub fn private_counterpart(&self) -> Option<Self> {
        match self {
            KeyPrefix::Xpub | KeyPrefix::Xprv => Some(KeyPrefix::Xprv),
            KeyPrefix::Ypub | KeyPrefix::Yprv => Some(KeyPrefix::Yprv),
            KeyPrefix::Zpub | KeyPrefix::Zprv => Some(KeyPrefix::Zprv),
            KeyPrefix::Tpub | KeyPrefix::Tprv => Some(KeyPrefix::Tprv),
            KeyPrefix::Upub | KeyPrefix::Uprv => Some(KeyPrefix::Uprv),
            KeyPrefix::Vpub | KeyPrefix::Vprv => Some(KeyPrefix::Vprv),
            _ => None,
        }
    }

    /// The BIP32 (`xpub`/`tpub` family) prefix of the same network and privacy.
    pub fn standard(&self) -> Self {
        match (self.is_mainnet(), self.is_private()) {
            (true, false) => KeyPrefix::Xpub,
            (true, true) => KeyPrefix::Xprv,
            (false, false) => KeyPrefix::Tpub,
            (false, true) => KeyPrefix::Tprv,
        }
    }
}

/// Decode an extended key of any known prefix into its prefix and raw payload.
pub fn decode_extended(key: &str) -> Result<(KeyPrefix, [u8; EXTENDED_KEY_LEN])> {
    let data = base58::decode_check(key.trim())
        .map_err(|e| WalletError::InvalidAccountKey(e.to_string()))?;
    if data.len() != EXTENDED_KEY_LEN {
        return Err(WalletError::InvalidAccountKey(format!(
            "extended key payload must be {} bytes, got {}",
            EXTENDED_KEY_LEN,
            data.len()
        )));
    }
    let version = [data[0], data[1], data[2], data[3]];
    let prefix = KeyPrefix::from_version(version)
        .ok_or_else(|| WalletError::InvalidAccountKey(format!("unknown version bytes {}", hex::encode(version))))?;
    let mut payload = [0u8; EXTENDED_KEY_LEN];
    payload.copy_from_slice(&data);
    Ok((prefix, payload))
}

/// Overwrite the version field and re-encode under `target`.
pub fn convert(key: &str, target: KeyPrefix) -> Result<String> {
    let (source, mut payload) = decode_extended(key)?;
    if source.is_private() != target.is_private() {
        return Err(WalletError::InvalidAccountKey(format!(
            "cannot convert {} into {}",
            source.as_str(),
            target.as_str()
        )));
    }
    payload[..4].copy_from_slice(&target.version());
    Ok(base58::encode_check(&payload))
}

/// Remap any SLIP132 key to its BIP32 form, returning the detected prefix.
pub fn to_standard(key: &str) -> Result<(String, KeyPrefix)> {
    let (source, _) = decode_extended(key)?;
    Ok((convert(key, source.standard())?, source))
}
