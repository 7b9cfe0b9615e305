//! Local keystore for CLI identities
//!
//! Each identity is a JSON file named after its address holding the
//! private key. The CLI authenticates callers by loading their key.

use crate::crypto::KeyPair;
use crate::identity::principal::{Address, Principal};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Keystore errors
#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Identity not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] crate::crypto::KeyError),
}

/// Serialized identity file
#[derive(Debug, Serialize, Deserialize)]
struct IdentityData {
    private_key_hex: String,
    address: String,
    label: Option<String>,
}

/// A key-backed identity
pub struct Identity {
    key_pair: KeyPair,
    pub label: Option<String>,
}

impl Identity {
    /// Create an identity with a fresh key pair
    pub fn generate(label: Option<&str>) -> Self {
        Self {
            key_pair: KeyPair::generate(),
            label: label.map(str::to_string),
        }
    }

    pub fn address(&self) -> Address {
        Address::new(self.key_pair.address())
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// The authenticated caller for this identity
    pub fn principal(&self) -> Principal {
        Principal::from_key_pair(&self.key_pair)
    }

    /// Save identity to file
    pub fn save(&self, path: &Path) -> Result<(), KeystoreError> {
        let data = IdentityData {
            private_key_hex: self.key_pair.private_key_hex(),
            address: self.key_pair.address(),
            label: self.label.clone(),
        };

        fs::write(path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }

    /// Load identity from file
    pub fn load(path: &Path) -> Result<Self, KeystoreError> {
        let data: IdentityData = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Self {
            key_pair: KeyPair::from_private_key_hex(&data.private_key_hex)?,
            label: data.label,
        })
    }

    /// Public information (safe to share)
    pub fn info(&self) -> IdentityInfo {
        IdentityInfo {
            address: self.address(),
            public_key: self.key_pair.public_key_hex(),
            label: self.label.clone(),
        }
    }
}

/// Public identity information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub address: Address,
    pub public_key: String,
    pub label: Option<String>,
}

/// Directory of identity files
pub struct Keystore {
    dir: PathBuf,
}

impl Keystore {
    pub fn new(dir: &Path) -> Result<Self, KeystoreError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, address: &str) -> PathBuf {
        self.dir.join(format!("{}.json", address))
    }

    /// Create and save a new identity
    pub fn create_identity(&self, label: Option<&str>) -> Result<Identity, KeystoreError> {
        let identity = Identity::generate(label);
        identity.save(&self.path_for(identity.address().as_str()))?;
        Ok(identity)
    }

    /// Load an identity by address
    pub fn load_identity(&self, address: &str) -> Result<Identity, KeystoreError> {
        let path = self.path_for(address);
        if !path.exists() {
            return Err(KeystoreError::NotFound(address.to_string()));
        }
        Identity::load(&path)
    }

    /// List public info for all identities, sorted by address
    pub fn list_identities(&self) -> Result<Vec<IdentityInfo>, KeystoreError> {
        let mut identities = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match Identity::load(&path) {
                    Ok(identity) => identities.push(identity.info()),
                    Err(e) => log::warn!("Skipping unreadable identity {:?}: {}", path, e),
                }
            }
        }

        identities.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_save_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("id.json");

        let identity = Identity::generate(Some("owner"));
        identity.save(&path).unwrap();

        let loaded = Identity::load(&path).unwrap();
        assert_eq!(loaded.address(), identity.address());
        assert_eq!(loaded.label.as_deref(), Some("owner"));
        assert_eq!(loaded.principal(), identity.principal());
    }

    #[test]
    fn test_keystore_create_and_list() {
        let temp_dir = tempfile::tempdir().unwrap();
        let keystore = Keystore::new(temp_dir.path()).unwrap();

        let a = keystore.create_identity(Some("a")).unwrap();
        let b = keystore.create_identity(None).unwrap();

        let listed = keystore.list_identities().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|i| i.address == a.address()));
        assert!(listed.iter().any(|i| i.address == b.address()));
    }

    #[test]
    fn test_load_missing_identity() {
        let temp_dir = tempfile::tempdir().unwrap();
        let keystore = Keystore::new(temp_dir.path()).unwrap();

        let result = keystore.load_identity("1nobody");
        assert!(matches!(result, Err(KeystoreError::NotFound(_))));
    }
}
