//! SHA-256 hashing of raw payloads and serialized records
//!
//! Every loaded row carries a `sha256_hash` column computed from its `data`
//! column, and every Kafka record carries hashes of its raw key and value
//! bytes. All hashes are lowercase hex.

use sha2::{Digest, Sha256};

/// Returns the sha256 hash of the bytes as a lowercase hex string
pub fn bytes_to_sha256_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Returns the sha256 hash of the utf-8 encoded string as a lowercase hex string
pub fn string_to_sha256_hash(string: &str) -> String {
    bytes_to_sha256_hash(string.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_sha256_hash() {
        assert_eq!(
            bytes_to_sha256_hash(b"Hello, world!"),
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
        );
    }

    #[test]
    fn test_string_hash_matches_bytes_hash() {
        assert_eq!(
            string_to_sha256_hash("Hello, world!"),
            bytes_to_sha256_hash(b"Hello, world!")
        );
    }
}
