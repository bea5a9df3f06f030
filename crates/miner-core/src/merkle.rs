//! Merkle tree computation for Bitcoin transactions.

use alloc::vec;
use alloc::vec::Vec;
use crate::hash::double_sha256;

/// Compute the merkle root from a list of transaction IDs.
///
/// For a single transaction (like our coinbase-only block), the merkle root
/// is simply the txid itself.
///
/// For multiple transactions, we build a binary tree of hashes.
pub fn compute_merkle_root(txids: &[[u8; 32]]) -> [u8; 32] {
    if txids.is_empty() {
        return [0u8; 32];
    }

    if txids.len() == 1 {
        return txids[0];
    }

    let mut current_level: Vec<[u8; 32]> = txids.to_vec();

    while current_level.len() > 1 {
        let mut next_level = Vec::with_capacity((current_level.len() + 1) / 2);

        for i in (0..current_level.len()).step_by(2) {
            let left = current_level[i];
            // If odd number of elements, duplicate the last one
            let right = if i + 1 < current_level.len() {
                current_level[i + 1]
            } else {
                current_level[i]
            };

            // Concatenate and hash
            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(&left);
            combined[32..].copy_from_slice(&right);
            next_level.push(double_sha256(&combined));
        }

        current_level = next_level;
    }

    current_level[0]
}

/// Compute the witness commitment for a SegWit block.
///
/// The witness commitment is: SHA256d(witness_merkle_root || witness_reserved_value)
///
/// For our coinbase-only block:
/// - The witness merkle root for a single coinbase is the coinbase's wtxid
/// - But the coinbase wtxid is defined as all zeros (32 zero bytes)
/// - So witness_merkle_root = 0x00...00 for coinbase-only blocks
///
/// # Arguments
/// * `witness_reserved_value` - The 32-byte witness reserved value from coinbase witness
pub fn compute_witness_commitment(witness_reserved_value: &[u8; 32]) -> [u8; 32] {
    // For coinbase-only block, witness merkle root is all zeros
    // because wtxid of coinbase is defined as all zeros
    let witness_merkle_root = [0u8; 32];

    let mut data = [0u8; 64];
    data[..32].copy_from_slice(&witness_merkle_root);
    data[32..].copy_from_slice(witness_reserved_value);

    double_sha256(&data)
}

/// Generate the scriptPubKey for a witness commitment output.
///
/// Format: OP_RETURN <commitment>
/// Where commitment = 0xaa21a9ed || witness_commitment
pub fn witness_commitment_script(witness_commitment: &[u8; 32]) -> Vec<u8> {
    let mut script = Vec::with_capacity(38);

    // OP_RETURN
    script.push(0x6a);

    // Push 36 bytes
    script.push(0x24);

    // Witness commitment header (magic bytes)
    script.extend_from_slice(&[0xaa, 0x21, 0xa9, 0xed]);

    // Witness commitment hash
    script.extend_from_slice(witness_commitment);

    script
}

/// Errors from merkle tree construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    /// A template with zero transactions (not even a coinbase) was supplied.
    EmptyMerkle,
    /// A leaf (coinbase raw transaction) was too short to contain its
    /// reported extra-nonce offset.
    InvalidLeaf,
}

impl core::fmt::Display for MerkleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MerkleError::EmptyMerkle => write!(f, "merkle tree has no leaves"),
            MerkleError::InvalidLeaf => write!(f, "leaf too short for extra-nonce offset"),
        }
    }
}

/// One step of a merkle authentication path: the sibling hash to combine
/// with, and whether the tracked node is the left or right child at this
/// level (determines concatenation order).
#[derive(Debug, Clone, Copy)]
struct PathStep {
    sibling: [u8; 32],
    node_is_left: bool,
}

/// Incremental merkle root calculator for extra-nonce mining.
///
/// Re-rolling the extra nonce only changes the coinbase transaction, which
/// is always merkle leaf 0. Everything above the coinbase's authentication
/// path in the tree is unaffected, so it only needs to be computed once per
/// template. [`CachedMerkleCalculator::recompute_for_extra_nonce`] then
/// costs O(log N) instead of rebuilding the O(N) tree from scratch.
pub struct CachedMerkleCalculator {
    coinbase_raw_tx: Vec<u8>,
    extra_nonce_offset: usize,
    path: Vec<PathStep>,
}

impl CachedMerkleCalculator {
    /// Build the calculator from the coinbase's non-witness serialization,
    /// its extra-nonce byte offset (from [`crate::coinbase::CoinbaseTransaction::extra_nonce_offset`]),
    /// and the txids of the other transactions in the block, in template order.
    pub fn new(
        coinbase_raw_tx: Vec<u8>,
        extra_nonce_offset: usize,
        coinbase_txid: [u8; 32],
        other_txids: &[[u8; 32]],
    ) -> Result<Self, MerkleError> {
        if extra_nonce_offset + 4 > coinbase_raw_tx.len() {
            return Err(MerkleError::InvalidLeaf);
        }

        let mut level: Vec<[u8; 32]> = Vec::with_capacity(1 + other_txids.len());
        level.push(coinbase_txid);
        level.extend_from_slice(other_txids);

        // Track the coinbase's position (always 0) as the tree is reduced,
        // recording the sibling needed to climb from this level to the next.
        let mut index = 0usize;
        let mut path = Vec::new();

        while level.len() > 1 {
            let node_is_left = index % 2 == 0;
            let sibling_index = if node_is_left { index + 1 } else { index - 1 };
            let sibling = if sibling_index < level.len() {
                level[sibling_index]
            } else {
                level[index]
            };
            path.push(PathStep {
                sibling,
                node_is_left,
            });

            let mut next_level = Vec::with_capacity((level.len() + 1) / 2);
            for i in (0..level.len()).step_by(2) {
                let left = level[i];
                let right = if i + 1 < level.len() { level[i + 1] } else { level[i] };
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(&left);
                combined[32..].copy_from_slice(&right);
                next_level.push(double_sha256(&combined));
            }

            index /= 2;
            level = next_level;
        }

        Ok(CachedMerkleCalculator {
            coinbase_raw_tx,
            extra_nonce_offset,
            path,
        })
    }

    /// Splice `extra_nonce` into the cached coinbase bytes, rehash the
    /// coinbase txid, and walk the cached authentication path to the root.
    pub fn recompute_for_extra_nonce(&mut self, extra_nonce: [u8; 4]) -> [u8; 32] {
        let offset = self.extra_nonce_offset;
        self.coinbase_raw_tx[offset..offset + 4].copy_from_slice(&extra_nonce);

        let mut node = double_sha256(&self.coinbase_raw_tx);
        for step in &self.path {
            let mut combined = [0u8; 64];
            if step.node_is_left {
                combined[..32].copy_from_slice(&node);
                combined[32..].copy_from_slice(&step.sibling);
            } else {
                combined[..32].copy_from_slice(&step.sibling);
                combined[32..].copy_from_slice(&node);
            }
            node = double_sha256(&combined);
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_tx_merkle_root() {
        let txid = [0x42u8; 32];
        let root = compute_merkle_root(&[txid]);
        assert_eq!(root, txid);
    }

    #[test]
    fn test_two_tx_merkle_root() {
        let tx1 = [0x11u8; 32];
        let tx2 = [0x22u8; 32];

        let root = compute_merkle_root(&[tx1, tx2]);

        // Manually compute expected root
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(&tx1);
        combined[32..].copy_from_slice(&tx2);
        let expected = double_sha256(&combined);

        assert_eq!(root, expected);
    }

    #[test]
    fn test_three_tx_merkle_root() {
        // With 3 transactions, the third is duplicated
        let tx1 = [0x11u8; 32];
        let tx2 = [0x22u8; 32];
        let tx3 = [0x33u8; 32];

        let root = compute_merkle_root(&[tx1, tx2, tx3]);

        // Level 1: hash(tx1, tx2), hash(tx3, tx3)
        let mut combined12 = [0u8; 64];
        combined12[..32].copy_from_slice(&tx1);
        combined12[32..].copy_from_slice(&tx2);
        let h12 = double_sha256(&combined12);

        let mut combined33 = [0u8; 64];
        combined33[..32].copy_from_slice(&tx3);
        combined33[32..].copy_from_slice(&tx3);
        let h33 = double_sha256(&combined33);

        // Level 0: hash(h12, h33)
        let mut final_combined = [0u8; 64];
        final_combined[..32].copy_from_slice(&h12);
        final_combined[32..].copy_from_slice(&h33);
        let expected = double_sha256(&final_combined);

        assert_eq!(root, expected);
    }

    #[test]
    fn test_cached_calculator_matches_full_rebuild() {
        // A fake "coinbase" raw tx with a 4-byte extra-nonce slot at offset 10.
        let mut coinbase_raw_tx = vec![0xAAu8; 10];
        coinbase_raw_tx.extend_from_slice(&[0u8; 4]);
        coinbase_raw_tx.extend_from_slice(&[0xBBu8; 6]);

        let other_txids = [[0x11u8; 32], [0x22u8; 32], [0x33u8; 32]];

        for extra_nonce in [[0u8, 0, 0, 1], [0, 0, 0, 2], [1, 2, 3, 4]] {
            let mut spliced = coinbase_raw_tx.clone();
            spliced[10..14].copy_from_slice(&extra_nonce);
            let coinbase_txid = double_sha256(&spliced);

            let expected = compute_merkle_root(&[
                coinbase_txid,
                other_txids[0],
                other_txids[1],
                other_txids[2],
            ]);

            let mut calc = CachedMerkleCalculator::new(
                coinbase_raw_tx.clone(),
                10,
                double_sha256(&coinbase_raw_tx),
                &other_txids,
            )
            .unwrap();

            assert_eq!(calc.recompute_for_extra_nonce(extra_nonce), expected);
        }
    }

    #[test]
    fn test_cached_calculator_single_leaf() {
        let coinbase_raw_tx = vec![0u8; 8];
        let mut calc =
            CachedMerkleCalculator::new(coinbase_raw_tx.clone(), 0, double_sha256(&coinbase_raw_tx), &[])
                .unwrap();

        let mut spliced = coinbase_raw_tx.clone();
        spliced[0..4].copy_from_slice(&[9, 9, 9, 9]);
        let expected = double_sha256(&spliced);

        assert_eq!(calc.recompute_for_extra_nonce([9, 9, 9, 9]), expected);
    }

    #[test]
    fn test_cached_calculator_rejects_short_leaf() {
        let result = CachedMerkleCalculator::new(vec![0u8; 2], 0, [0u8; 32], &[]);
        assert_eq!(result.unwrap_err(), MerkleError::InvalidLeaf);
    }

    #[test]
    fn test_witness_commitment_script() {
        let commitment = [0xAB; 32];
        let script = witness_commitment_script(&commitment);

        assert_eq!(script.len(), 38);
        assert_eq!(script[0], 0x6a); // OP_RETURN
        assert_eq!(script[1], 0x24); // Push 36 bytes
        assert_eq!(&script[2..6], &[0xaa, 0x21, 0xa9, 0xed]); // Magic
        assert_eq!(&script[6..], &commitment[..]); // Commitment
    }
}
