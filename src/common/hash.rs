//! Hashing utilities for ringkv
//!
//! - BLAKE3 digests truncated to a `u32` ring position
//! - Virtual node labels (`id:index`)

/// A point on the hash ring
pub type Position = u32;

/// Map arbitrary bytes to a ring position.
///
/// Takes the first 4 bytes of the BLAKE3 digest as a big-endian integer, so
/// the same label always lands on the same position.
pub fn ring_position(data: &[u8]) -> Position {
    let hash = blake3::hash(data);
    let bytes = hash.as_bytes();
    Position::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Ring position of a key
pub fn key_position(key: &str) -> Position {
    ring_position(key.as_bytes())
}

/// Label of the `index`-th virtual node of a storage unit
pub fn virtual_node_label(node_id: &str, index: usize) -> String {
    format!("{}:{}", node_id, index)
}

/// Positions owned by a storage unit with `count` virtual nodes
pub fn virtual_node_positions(node_id: &str, count: usize) -> Vec<Position> {
    (0..count)
        .map(|i| ring_position(virtual_node_label(node_id, i).as_bytes()))
        .collect()
}
