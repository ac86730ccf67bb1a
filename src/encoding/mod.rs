//! Key and address string encodings: Base58Check and SLIP-0132 prefixes.

pub mod base58;
pub mod slip132;

pub use slip132::{convert as convert_extended_key, KeyPrefix};
