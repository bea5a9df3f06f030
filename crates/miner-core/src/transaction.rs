//! Generic Bitcoin transaction serialization.
//!
//! The coinbase builder in [`crate::coinbase`] only ever needs to emit one
//! very specific transaction shape. This module serializes and parses
//! arbitrary transactions (the non-coinbase set a template carries, used as
//! merkle leaves) using the standard legacy/SegWit wire format.

use alloc::vec;
use alloc::vec::Vec;
use crate::hash::double_sha256;

/// Errors from transaction (de)serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    /// Ran out of bytes while decoding a field.
    UnexpectedEof,
    /// The payout address decoded to a type this builder doesn't support.
    UnsupportedPayout,
}

impl core::fmt::Display for TxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TxError::UnexpectedEof => write!(f, "unexpected end of transaction bytes"),
            TxError::UnsupportedPayout => write!(f, "unsupported payout script type"),
        }
    }
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Referenced transaction's txid, internal (non-display) byte order.
    pub previous_txid: [u8; 32],
    /// Referenced output index.
    pub previous_vout: u32,
    /// Unlocking script.
    pub script_sig: Vec<u8>,
    /// Sequence number.
    pub sequence: u32,
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Value in satoshis.
    pub value: u64,
    /// Locking script.
    pub script_pubkey: Vec<u8>,
}

/// A Bitcoin transaction, with optional per-input witness stacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction version.
    pub version: u32,
    /// Inputs, in order.
    pub inputs: Vec<TxInput>,
    /// Outputs, in order.
    pub outputs: Vec<TxOutput>,
    /// Witness stack per input. Empty stacks throughout means this is a
    /// legacy (pre-SegWit) transaction.
    pub witnesses: Vec<Vec<Vec<u8>>>,
    /// Locktime.
    pub locktime: u32,
}

impl Transaction {
    fn has_witness(&self) -> bool {
        self.witnesses.iter().any(|stack| !stack.is_empty())
    }

    /// Serialize without witness data — the form that `txid` hashes.
    pub fn serialize_no_witness(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.version.to_le_bytes());
        encode_varint(self.inputs.len() as u64, &mut out);
        for input in &self.inputs {
            out.extend_from_slice(&input.previous_txid);
            out.extend_from_slice(&input.previous_vout.to_le_bytes());
            encode_varint(input.script_sig.len() as u64, &mut out);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        encode_varint(self.outputs.len() as u64, &mut out);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            encode_varint(output.script_pubkey.len() as u64, &mut out);
            out.extend_from_slice(&output.script_pubkey);
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    /// Serialize the full wire form: adds the SegWit marker/flag and
    /// witness stacks when any input carries witness data.
    pub fn serialize(&self) -> Vec<u8> {
        if !self.has_witness() {
            return self.serialize_no_witness();
        }

        let mut out = Vec::with_capacity(160);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(0x00); // marker
        out.push(0x01); // flag
        encode_varint(self.inputs.len() as u64, &mut out);
        for input in &self.inputs {
            out.extend_from_slice(&input.previous_txid);
            out.extend_from_slice(&input.previous_vout.to_le_bytes());
            encode_varint(input.script_sig.len() as u64, &mut out);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        encode_varint(self.outputs.len() as u64, &mut out);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            encode_varint(output.script_pubkey.len() as u64, &mut out);
            out.extend_from_slice(&output.script_pubkey);
        }
        for stack in &self.witnesses {
            encode_varint(stack.len() as u64, &mut out);
            for item in stack {
                encode_varint(item.len() as u64, &mut out);
                out.extend_from_slice(item);
            }
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    /// Transaction id: `reverse(double_sha256(serialize_no_witness(tx)))`.
    pub fn txid(&self) -> [u8; 32] {
        txid(&self.serialize_no_witness())
    }
}

/// Compute a txid from already-serialized (non-witness) transaction bytes.
pub fn txid(serialized_no_witness: &[u8]) -> [u8; 32] {
    let mut h = double_sha256(serialized_no_witness);
    h.reverse();
    h
}

/// Serialize a transaction to bytes (wire form).
pub fn serialize_tx(tx: &Transaction) -> Vec<u8> {
    tx.serialize()
}

/// Parse a transaction from wire bytes, including SegWit marker/flag and
/// witness data when present. Inverse of [`serialize_tx`].
pub fn parse_tx(bytes: &[u8]) -> Result<Transaction, TxError> {
    let mut cur = Cursor::new(bytes);
    let version = cur.read_u32()?;

    let mut segwit = false;
    let marker = cur.peek_u8()?;
    if marker == 0x00 {
        let flag = cur.peek_u8_at(1)?;
        if flag == 0x01 {
            segwit = true;
            cur.advance(2)?;
        }
    }

    let input_count = cur.read_varint()?;
    let mut inputs = Vec::with_capacity(input_count as usize);
    for _ in 0..input_count {
        let mut previous_txid = [0u8; 32];
        previous_txid.copy_from_slice(cur.read_bytes(32)?);
        let previous_vout = cur.read_u32()?;
        let script_len = cur.read_varint()?;
        let script_sig = cur.read_bytes(script_len as usize)?.to_vec();
        let sequence = cur.read_u32()?;
        inputs.push(TxInput {
            previous_txid,
            previous_vout,
            script_sig,
            sequence,
        });
    }

    let output_count = cur.read_varint()?;
    let mut outputs = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        let value = cur.read_u64()?;
        let script_len = cur.read_varint()?;
        let script_pubkey = cur.read_bytes(script_len as usize)?.to_vec();
        outputs.push(TxOutput {
            value,
            script_pubkey,
        });
    }

    let mut witnesses = vec![Vec::new(); inputs.len()];
    if segwit {
        for witness in witnesses.iter_mut() {
            let item_count = cur.read_varint()?;
            let mut stack = Vec::with_capacity(item_count as usize);
            for _ in 0..item_count {
                let item_len = cur.read_varint()?;
                stack.push(cur.read_bytes(item_len as usize)?.to_vec());
            }
            *witness = stack;
        }
    }

    let locktime = cur.read_u32()?;

    Ok(Transaction {
        version,
        inputs,
        outputs,
        witnesses,
        locktime,
    })
}

/// Encode a variable-length integer (Bitcoin varint).
pub fn encode_varint(value: u64, output: &mut Vec<u8>) {
    if value < 0xfd {
        output.push(value as u8);
    } else if value <= 0xffff {
        output.push(0xfd);
        output.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffffffff {
        output.push(0xfe);
        output.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        output.push(0xff);
        output.extend_from_slice(&value.to_le_bytes());
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn advance(&mut self, n: usize) -> Result<(), TxError> {
        if self.pos + n > self.bytes.len() {
            return Err(TxError::UnexpectedEof);
        }
        self.pos += n;
        Ok(())
    }

    fn peek_u8(&self) -> Result<u8, TxError> {
        self.bytes.get(self.pos).copied().ok_or(TxError::UnexpectedEof)
    }

    fn peek_u8_at(&self, offset: usize) -> Result<u8, TxError> {
        self.bytes
            .get(self.pos + offset)
            .copied()
            .ok_or(TxError::UnexpectedEof)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], TxError> {
        if self.pos + n > self.bytes.len() {
            return Err(TxError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, TxError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, TxError> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_varint(&mut self) -> Result<u64, TxError> {
        let first = self.read_bytes(1)?[0];
        match first {
            0xfd => {
                let b = self.read_bytes(2)?;
                Ok(u16::from_le_bytes(b.try_into().unwrap()) as u64)
            }
            0xfe => {
                let b = self.read_bytes(4)?;
                Ok(u32::from_le_bytes(b.try_into().unwrap()) as u64)
            }
            0xff => {
                let b = self.read_bytes(8)?;
                Ok(u64::from_le_bytes(b.try_into().unwrap()))
            }
            n => Ok(n as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_legacy_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_txid: [0x42u8; 32],
                previous_vout: 0,
                script_sig: vec![0x01, 0x02, 0x03],
                sequence: 0xFFFFFFFF,
            }],
            outputs: vec![TxOutput {
                value: 5_000_000_000,
                script_pubkey: vec![0x76, 0xa9, 0x14],
            }],
            witnesses: vec![Vec::new()],
            locktime: 0,
        }
    }

    #[test]
    fn test_legacy_round_trip() {
        let tx = sample_legacy_tx();
        let bytes = serialize_tx(&tx);
        let parsed = parse_tx(&bytes).unwrap();
        assert_eq!(tx, parsed);
    }

    #[test]
    fn test_segwit_round_trip() {
        let mut tx = sample_legacy_tx();
        tx.witnesses = vec![vec![vec![0xAAu8; 4], vec![0xBBu8; 2]]];

        let bytes = serialize_tx(&tx);
        // Marker/flag present.
        assert_eq!(&bytes[4..6], &[0x00, 0x01]);

        let parsed = parse_tx(&bytes).unwrap();
        assert_eq!(tx, parsed);
    }

    #[test]
    fn test_txid_ignores_witness() {
        let legacy = sample_legacy_tx();
        let mut segwit = legacy.clone();
        segwit.witnesses = vec![vec![vec![0xAAu8; 4]]];

        assert_eq!(legacy.txid(), segwit.txid());
    }
}
