//! Raw transaction model and consensus (de)serialization.
//!
//! Layout: version(4) [marker 0x00, flag 0x01] varint(#in) inputs
//! varint(#out) outputs [witness stacks] locktime(4). The txid hashes the
//! serialization without marker, flag and witnesses.

use crate::error::{Result, WalletError};
use bitcoin::hashes::{sha256d, Hash};

pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;
pub const TX_VERSION: i32 = 2;

pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

pub fn write_varint(buf: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

/// Length-prefixed byte string.
pub fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Transaction id in display (reversed) hex to internal byte order.
pub fn txid_to_bytes(txid: &str) -> Result<[u8; 32]> {
    let mut bytes = hex::decode(txid.trim()).map_err(|e| WalletError::validation(format!("txid '{}': {}", txid, e)))?;
    if bytes.len() != 32 {
        return Err(WalletError::validation(format!("txid must be 32 bytes, got {}", bytes.len())));
    }
    bytes.reverse();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn txid_to_hex(bytes: &[u8; 32]) -> String {
    let mut reversed = *bytes;
    reversed.reverse();
    hex::encode(reversed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Internal byte order.
    pub txid: [u8; 32],
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid_hex: &str, vout: u32) -> Result<Self> {
        Ok(Self { txid: txid_to_bytes(txid_hex)?, vout })
    }

    pub fn txid_hex(&self) -> String {
        txid_to_hex(&self.txid)
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.txid);
        buf.extend_from_slice(&self.vout.to_le_bytes());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    pub fn unsigned(previous_output: OutPoint) -> Self {
        Self { previous_output, script_sig: Vec::new(), sequence: SEQUENCE_FINAL, witness: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        write_bytes(buf, &self.script_pubkey);
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9 + self.script_pubkey.len());
        self.write(&mut buf);
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let out = reader.read_txout()?;
        reader.finish()?;
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self { version: TX_VERSION, inputs, outputs, lock_time: 0 }
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    fn write(&self, buf: &mut Vec<u8>, with_witness: bool) {
        let segwit = with_witness && self.has_witness();
        buf.extend_from_slice(&self.version.to_le_bytes());
        if segwit {
            buf.extend_from_slice(&[0x00, 0x01]);
        }
        write_varint(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.previous_output.write(buf);
            write_bytes(buf, &input.script_sig);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write(buf);
        }
        if segwit {
            for input in &self.inputs {
                write_varint(buf, input.witness.len() as u64);
                for item in &input.witness {
                    write_bytes(buf, item);
                }
            }
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
    }

    /// Full serialization, including witnesses when any input has one.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf, true);
        buf
    }

    pub fn serialize_without_witness(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf, false);
        buf
    }

    pub fn txid(&self) -> String {
        txid_to_hex(&double_sha256(&self.serialize_without_witness()))
    }

    pub fn wtxid(&self) -> String {
        txid_to_hex(&double_sha256(&self.serialize()))
    }

    pub fn base_size(&self) -> usize {
        self.serialize_without_witness().len()
    }

    pub fn total_size(&self) -> usize {
        self.serialize().len()
    }

    /// `4 * base + witness` where witness bytes include marker and flag.
    pub fn weight(&self) -> usize {
        let base = self.base_size();
        base * 4 + (self.total_size() - base)
    }

    pub fn vsize(&self) -> usize {
        self.weight().div_ceil(4)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let tx = reader.read_transaction()?;
        reader.finish()?;
        Ok(tx)
    }

    pub fn from_hex(raw: &str) -> Result<Self> {
        let bytes = hex::decode(raw.trim()).map_err(|e| WalletError::validation(format!("transaction hex: {}", e)))?;
        Self::deserialize(&bytes)
    }
}

/// Cursor over consensus-encoded bytes.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn finish(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(WalletError::validation(format!("{} trailing bytes", self.remaining())))
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(WalletError::validation(format!("unexpected end of data at byte {}", self.pos)));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(b))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(b))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        match self.read_u8()? {
            0xfd => Ok(u16::from_le_bytes([self.read_u8()?, self.read_u8()?]) as u64),
            0xfe => Ok(self.read_u32()? as u64),
            0xff => self.read_u64(),
            n => Ok(n as u64),
        }
    }

    /// Varint length followed by that many bytes.
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| WalletError::validation("length overflow"))?;
        self.read_bytes(len)
    }

    fn read_count(&mut self) -> Result<usize> {
        let n = self.read_varint()?;
        // Each element takes at least one byte
        if n as usize > self.remaining() {
            return Err(WalletError::validation(format!("element count {} exceeds remaining data", n)));
        }
        Ok(n as usize)
    }

    pub fn read_txout(&mut self) -> Result<TxOut> {
        let value = self.read_u64()?;
        let script_pubkey = self.read_var_bytes()?.to_vec();
        Ok(TxOut { value, script_pubkey })
    }

    pub fn read_transaction(&mut self) -> Result<Transaction> {
        let version = self.read_u32()? as i32;
        let mut segwit = false;
        if self.peek_u8() == Some(0x00) {
            self.read_u8()?;
            if self.read_u8()? != 0x01 {
                return Err(WalletError::validation("bad segwit flag"));
            }
            segwit = true;
        }

        let n_in = self.read_count()?;
        let mut inputs = Vec::with_capacity(n_in);
        for _ in 0..n_in {
            let mut txid = [0u8; 32];
            txid.copy_from_slice(self.read_bytes(32)?);
            let vout = self.read_u32()?;
            let script_sig = self.read_var_bytes()?.to_vec();
            let sequence = self.read_u32()?;
            inputs.push(TxIn { previous_output: OutPoint { txid, vout }, script_sig, sequence, witness: Vec::new() });
        }

        let n_out = self.read_count()?;
        let mut outputs = Vec::with_capacity(n_out);
        for _ in 0..n_out {
            outputs.push(self.read_txout()?);
        }

        if segwit {
            for input in inputs.iter_mut() {
                let items = self.read_count()?;
                for _ in 0..items {
                    input.witness.push(self.read_var_bytes()?.to_vec());
                }
            }
        }

        let lock_time = self.read_u32()?;
        Ok(Transaction { version, inputs, outputs, lock_time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        let input = TxIn::unsigned(OutPoint::new(&"ab".repeat(32), 1).unwrap());
        let output = TxOut { value: 50_000, script_pubkey: vec![0x00, 0x14].into_iter().chain([7u8; 20]).collect() };
        Transaction::new(vec![input], vec![output])
    }

    #[test]
    fn test_varint_boundaries() {
        for (n, expected) in [
            (0u64, vec![0x00]),
            (0xfc, vec![0xfc]),
            (0xfd, vec![0xfd, 0xfd, 0x00]),
            (0xffff, vec![0xfd, 0xff, 0xff]),
            (0x10000, vec![0xfe, 0x00, 0x00, 0x01, 0x00]),
        ] {
            let mut buf = Vec::new();
            write_varint(&mut buf, n);
            assert_eq!(buf, expected);
            assert_eq!(Reader::new(&buf).read_varint().unwrap(), n);
        }
    }

    #[test]
    fn test_txid_byte_order() {
        let txid = format!("{}{}", "00".repeat(31), "ff");
        let bytes = txid_to_bytes(&txid).unwrap();
        assert_eq!(bytes[0], 0xff);
        assert_eq!(txid_to_hex(&bytes), txid);
    }

    #[test]
    fn test_legacy_and_witness_sizes() {
        let mut tx = sample();
        let base = tx.serialize();
        assert_eq!(base, tx.serialize_without_witness());
        assert_eq!(tx.weight(), base.len() * 4);

        tx.inputs[0].witness = vec![vec![1u8; 72], vec![2u8; 33]];
        let full = tx.serialize();
        assert_eq!(&full[4..6], &[0x00, 0x01]);
        // marker+flag (2) + item count (1) + two length-prefixed items
        assert_eq!(full.len() - base.len(), 2 + 1 + 73 + 34);
        assert_eq!(tx.txid(), Transaction::deserialize(&base).unwrap().txid());
        assert_ne!(tx.txid(), tx.wtxid());
        assert_eq!(tx.vsize(), (base.len() * 4 + 110).div_ceil(4));
    }

    #[test]
    fn test_round_trip_and_bitcoin_decode() {
        let mut tx = sample();
        tx.inputs[0].witness = vec![vec![0x30; 71], vec![0x02; 33]];
        let bytes = tx.serialize();
        assert_eq!(Transaction::deserialize(&bytes).unwrap(), tx);

        let decoded: bitcoin::Transaction = bitcoin::consensus::deserialize(&bytes).unwrap();
        assert_eq!(decoded.compute_txid().to_string(), tx.txid());
        assert_eq!(decoded.weight().to_wu() as usize, tx.weight());
        assert_eq!(decoded.vsize(), tx.vsize());
    }

    #[test]
    fn test_rejects_truncated_and_trailing() {
        let bytes = sample().serialize();
        assert!(Transaction::deserialize(&bytes[..bytes.len() - 1]).is_err());
        let mut extra = bytes.clone();
        extra.push(0);
        assert!(Transaction::deserialize(&extra).is_err());
    }
}
