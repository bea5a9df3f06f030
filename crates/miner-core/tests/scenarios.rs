//! Cross-module regression scenarios, exercised through the crate's public
//! API only (no internal modules) — the concrete end-to-end vectors a
//! mining engine's test suite should never regress on.

use miner_core::{bytes_to_hex, double_sha256, hash_header, parse_header, sha256, BlockHeader, Target};

#[test]
fn s1_sha256_hello_vector() {
    let hash = sha256(b"hello");
    assert_eq!(
        bytes_to_hex(&hash),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
}

#[test]
fn s2_double_sha256_of_empty_string() {
    let hash = double_sha256(b"");
    assert_eq!(
        bytes_to_hex(&hash),
        "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
    );
}

#[test]
fn s3_genesis_block_mines_expected_nonce_and_hash() {
    let merkle_root_display =
        "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
    let mut merkle_root = hex_to_internal(merkle_root_display);
    merkle_root.reverse();

    let mut header = BlockHeader::new([0u8; 32], merkle_root, 1_231_006_505, 0x1d00ffff);
    header.nonce = 2_083_236_893;

    let target = Target::from_bits(0x1d00ffff);
    let mut hash = hash_header(&header.serialize());
    assert!(target.is_valid(&hash));

    hash.reverse();
    assert_eq!(
        bytes_to_hex(&hash),
        "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
    );

    let round_tripped = parse_header(&header.serialize()).unwrap();
    assert_eq!(round_tripped, header);
}

fn hex_to_internal(display: &str) -> [u8; 32] {
    let bytes = miner_core::hex_to_bytes(display).unwrap();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out
}
