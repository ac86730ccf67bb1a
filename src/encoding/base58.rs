//! Base58 / Base58Check
//!
//! Byte-wise long division in both directions, so no big-integer type is
//! needed and cost stays quadratic in the input length.

use crate::error::{Result, WalletError};
use bitcoin::hashes::{sha256d, Hash};

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Reverse lookup, 0xff marks characters outside the alphabet.
const INDEX: [u8; 128] = {
    let mut table = [0xffu8; 128];
    let mut i = 0;
    while i < 58 {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
};

pub fn encode(data: &[u8]) -> String {
    let zeros = data.iter().take_while(|&&b| b == 0).count();
    // log(256) / log(58) ~ 1.37
    let mut digits: Vec<u8> = Vec::with_capacity(data.len() * 138 / 100 + 1);

    for &byte in &data[zeros..] {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.iter().rev().map(|&d| ALPHABET[d as usize] as char));
    out
}

pub fn decode(s: &str) -> Result<Vec<u8>> {
    let ones = s.bytes().take_while(|&c| c == b'1').count();
    let mut bytes: Vec<u8> = Vec::with_capacity(s.len());

    for (pos, c) in s.bytes().enumerate().skip(ones) {
        let value = if c < 128 { INDEX[c as usize] } else { 0xff };
        if value == 0xff {
            return Err(WalletError::validation(format!("invalid base58 character at {}", pos)));
        }
        let mut carry = value as u32;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; ones];
    out.extend(bytes.iter().rev());
    Ok(out)
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let hash = sha256d::Hash::hash(payload).to_byte_array();
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Append a 4-byte double-SHA256 checksum and encode.
pub fn encode_check(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum(payload));
    encode(&data)
}

/// Decode and verify the trailing checksum, returning the payload only.
pub fn decode_check(s: &str) -> Result<Vec<u8>> {
    let mut data = decode(s)?;
    if data.len() < 4 {
        return Err(WalletError::validation("base58check payload too short"));
    }
    let split = data.len() - 4;
    if checksum(&data[..split]) != data[split..] {
        return Err(WalletError::validation("base58check checksum mismatch"));
    }
    data.truncate(split);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(encode(b""), "");
        assert_eq!(encode(b"hello world"), "StV1DL6CwTryKyV");
        assert_eq!(encode(&[0, 0, 0x28, 0x7f, 0xb4, 0xcd]), "11233QC4");
        assert_eq!(decode("11233QC4").unwrap(), vec![0, 0, 0x28, 0x7f, 0xb4, 0xcd]);
    }

    #[test]
    fn test_round_trip_with_leading_zeros() {
        let cases: [&[u8]; 5] = [&[0], &[0, 0, 0], &[0, 0, 1, 2, 3], &[0xff; 40], &[0, 0xff, 0, 0xff]];
        for case in cases {
            assert_eq!(decode(&encode(case)).unwrap(), case);
            assert_eq!(decode_check(&encode_check(case)).unwrap(), case);
        }
    }

    #[test]
    fn test_decode_check_p2pkh() {
        // Genesis coinbase address
        let payload = decode_check("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap();
        assert_eq!(payload.len(), 21);
        assert_eq!(payload[0], 0x00);
        assert_eq!(hex::encode(&payload[1..]), "62e907b15cbf27d5425399ebf6f0fb50ebb88f18");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(decode("0OIl").is_err());
        assert!(decode("abc€").is_err());
        assert!(decode_check("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb").is_err());
        assert!(decode_check("1").is_err());
    }
}
