//! Block header construction, 80-byte wire codec, and target comparison.

use crate::difficulty::bits_to_target;
use crate::hash::double_sha256;
use crate::network::BLOCK_VERSION;

/// Errors from header (de)serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// The supplied buffer was not exactly 80 bytes.
    WrongLength(usize),
}

impl core::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HeaderError::WrongLength(n) => write!(f, "header must be 80 bytes, got {}", n),
        }
    }
}

/// A Bitcoin block header (80 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version with BIP9 versionbits.
    pub version: i32,
    /// Hash of the previous block (internal byte order).
    pub prev_block_hash: [u8; 32],
    /// Merkle root of all transactions.
    pub merkle_root: [u8; 32],
    /// Block timestamp (Unix time).
    pub timestamp: u32,
    /// Difficulty target in compact "bits" format.
    pub bits: u32,
    /// Nonce for proof of work.
    pub nonce: u32,
}

impl BlockHeader {
    /// Create a new block header.
    pub fn new(
        prev_block_hash: [u8; 32],
        merkle_root: [u8; 32],
        timestamp: u32,
        bits: u32,
    ) -> Self {
        BlockHeader {
            version: BLOCK_VERSION,
            prev_block_hash,
            merkle_root,
            timestamp,
            bits,
            nonce: 0,
        }
    }

    /// Serialize the block header to 80 bytes.
    pub fn serialize(&self) -> [u8; 80] {
        let mut header = [0u8; 80];

        header[0..4].copy_from_slice(&self.version.to_le_bytes());
        header[4..36].copy_from_slice(&self.prev_block_hash);
        header[36..68].copy_from_slice(&self.merkle_root);
        header[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        header[72..76].copy_from_slice(&self.bits.to_le_bytes());
        header[76..80].copy_from_slice(&self.nonce.to_le_bytes());

        header
    }

    /// Serialize the header without the nonce (76 bytes).
    /// Used for efficient mining where we only change the nonce.
    pub fn serialize_without_nonce(&self) -> [u8; 76] {
        let mut header = [0u8; 76];

        header[0..4].copy_from_slice(&self.version.to_le_bytes());
        header[4..36].copy_from_slice(&self.prev_block_hash);
        header[36..68].copy_from_slice(&self.merkle_root);
        header[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        header[72..76].copy_from_slice(&self.bits.to_le_bytes());

        header
    }

    /// Compute the block hash: double-SHA256 of the 80-byte header.
    pub fn hash(&self) -> [u8; 32] {
        double_sha256(&self.serialize())
    }

    /// Get the target as a 256-bit big-endian number.
    pub fn target(&self) -> [u8; 32] {
        bits_to_target(self.bits)
    }
}

/// Parse an 80-byte wire buffer back into a [`BlockHeader`].
///
/// Inverse of [`BlockHeader::serialize`]; `parse(serialize(h)) == h` for
/// every header `h`.
pub fn parse(bytes: &[u8]) -> Result<BlockHeader, HeaderError> {
    if bytes.len() != 80 {
        return Err(HeaderError::WrongLength(bytes.len()));
    }

    let version = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let mut prev_block_hash = [0u8; 32];
    prev_block_hash.copy_from_slice(&bytes[4..36]);
    let mut merkle_root = [0u8; 32];
    merkle_root.copy_from_slice(&bytes[36..68]);
    let timestamp = u32::from_le_bytes(bytes[68..72].try_into().unwrap());
    let bits = u32::from_le_bytes(bytes[72..76].try_into().unwrap());
    let nonce = u32::from_le_bytes(bytes[76..80].try_into().unwrap());

    Ok(BlockHeader {
        version,
        prev_block_hash,
        merkle_root,
        timestamp,
        bits,
        nonce,
    })
}

/// A parsed 256-bit difficulty target, ready for repeated comparisons
/// without reparsing `bits` on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target(pub [u8; 32]);

impl Target {
    /// Parse the target once from a template's compact `bits` encoding.
    pub fn from_bits(bits: u32) -> Self {
        Target(bits_to_target(bits))
    }

    /// Wrap an already-expanded 256-bit big-endian target.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Target(bytes)
    }

    /// Return true iff `hash`, read as a big-endian 256-bit integer, is
    /// strictly less than this target. Never allocates.
    #[inline]
    pub fn is_valid(&self, hash: &[u8; 32]) -> bool {
        for i in 0..32 {
            if hash[i] < self.0[i] {
                return true;
            }
            if hash[i] > self.0[i] {
                return false;
            }
        }
        false
    }
}

/// Compute the block hash of a raw 80-byte header.
pub fn hash_header(header_bytes: &[u8; 80]) -> [u8; 32] {
    double_sha256(header_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut header = BlockHeader::new([0x11u8; 32], [0x22u8; 32], 1_700_000_000, 0x1d00ffff);
        header.nonce = 99;

        let bytes = header.serialize();
        let parsed = parse(&bytes).unwrap();

        assert_eq!(header, parsed);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert_eq!(parse(&[0u8; 79]), Err(HeaderError::WrongLength(79)));
    }

    #[test]
    fn test_target_always_valid_against_max() {
        let target = Target::from_bytes([0xFFu8; 32]);
        let header = BlockHeader::new([0u8; 32], [0u8; 32], 0, 0x1d00ffff);
        assert!(target.is_valid(&header.hash()));
    }

    #[test]
    fn test_genesis_header_hash() {
        // S3: Bitcoin genesis block header, mined at nonce 2083236893.
        let merkle_root_display = crate::hash::hex_to_bytes(
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
        )
        .unwrap();
        let mut merkle_root = [0u8; 32];
        for i in 0..32 {
            merkle_root[i] = merkle_root_display[31 - i];
        }

        let mut header = BlockHeader::new([0u8; 32], merkle_root, 1_231_006_505, 0x1d00ffff);
        header.nonce = 2_083_236_893;

        let mut hash = header.hash();
        hash.reverse();

        assert_eq!(
            crate::hash::bytes_to_hex(&hash),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }
}
