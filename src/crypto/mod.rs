//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 hashing
//! - ECDSA key management (secp256k1) and address derivation

pub mod hash;
pub mod keys;

pub use hash::{double_sha256, hash_parts, sha256, sha256_hex, zero_hash, HASH_HEX_LEN};
pub use keys::{
    public_key_from_hex, public_key_to_address, sign_message, verify_signature, KeyError, KeyPair,
};
