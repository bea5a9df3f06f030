//! Core Bitcoin mining logic for the mining engine.
//!
//! This crate provides pure Rust implementations of:
//! - Bitcoin address validation (P2PKH, P2SH, P2WPKH, P2WSH, P2TR)
//! - Block header construction, 80-byte wire codec, and target comparison
//! - Coinbase transaction building with BIP34 compliance
//! - Generic transaction (de)serialization
//! - SHA256 double-hashing for mining
//! - Incremental merkle root recomputation for extra-nonce search
//! - Difficulty target conversion and comparison

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod address;
pub mod coinbase;
pub mod difficulty;
pub mod hash;
pub mod header;
pub mod merkle;
pub mod network;
pub mod transaction;

pub use address::{validate_address, AddressError, AddressType, ValidatedAddress};
pub use coinbase::{CoinbaseBuilder, CoinbaseTransaction};
pub use difficulty::{bits_to_target, hash_meets_target};
pub use hash::{bytes_to_hex, double_sha256, hex_to_bytes, mine_batch, sha256, HashError, MiningResult};
pub use header::{hash_header, parse as parse_header, BlockHeader, HeaderError, Target};
pub use merkle::{compute_merkle_root, CachedMerkleCalculator, MerkleError};
pub use network::Network;
pub use transaction::{parse_tx, serialize_tx, Transaction, TxError, TxInput, TxOutput};
