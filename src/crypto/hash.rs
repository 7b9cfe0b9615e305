//! Hashing utilities
//!
//! SHA-256 helpers used for call digests, address checksums and the
//! hash chain of the event ledger.

use sha2::{Digest, Sha256};

/// Length of a SHA-256 digest rendered as hex
pub const HASH_HEX_LEN: usize = 64;

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
///
/// Used for Base58Check address checksums.
pub fn double_sha256(data: &[u8]) -> Vec<u8> {
    sha256(&sha256(data))
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Hashes a sequence of parts into a single hex digest.
///
/// Each part is length-prefixed so that `["ab", "c"]` and `["a", "bc"]`
/// produce different digests.
pub fn hash_parts(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// The all-zero digest used as the predecessor of the first ledger record
pub fn zero_hash() -> String {
    "0".repeat(HASH_HEX_LEN)
}
