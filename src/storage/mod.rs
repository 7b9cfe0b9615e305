//! Storage module for protocol state persistence

pub mod persistence;

pub use persistence::{Storage, StorageConfig, StorageError, StorageStats};
