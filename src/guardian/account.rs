//! Protected account records
//!
//! A protected account binds an owner to an opaque encrypted key blob, an
//! ordered set of guardians and an approval threshold.

use crate::clock::Timestamp;
use crate::identity::Address;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Size of the encrypted key blob in bytes
pub const KEY_BLOB_LEN: usize = 32;

/// Errors related to account and guardian management
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardianError {
    #[error("Wallet already exists: {0}")]
    DuplicateAccount(Address),
    #[error("Invalid threshold: {threshold} with {guardians} guardian(s)")]
    InvalidThreshold { threshold: u32, guardians: usize },
    #[error("Duplicate guardian: {0}")]
    DuplicateGuardian(Address),
    #[error("Already a guardian: {0}")]
    AlreadyGuardian(Address),
    #[error("Wallet not found: {0}")]
    AccountNotFound(Address),
    #[error("Caller {0} is not the account owner")]
    NotOwner(Address),
    #[error("Invalid key blob: expected 32 bytes, got {0}")]
    InvalidKeyBlob(usize),
}

/// Opaque encrypted key material, stored and never interpreted
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyBlob([u8; KEY_BLOB_LEN]);

impl KeyBlob {
    pub fn from_bytes(bytes: [u8; KEY_BLOB_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, GuardianError> {
        let array: [u8; KEY_BLOB_LEN] = bytes
            .try_into()
            .map_err(|_| GuardianError::InvalidKeyBlob(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn from_hex(hex_blob: &str) -> Result<Self, GuardianError> {
        let hex_blob = hex_blob.strip_prefix("0x").unwrap_or(hex_blob);
        let bytes =
            hex::decode(hex_blob).map_err(|_| GuardianError::InvalidKeyBlob(hex_blob.len() / 2))?;
        Self::from_slice(&bytes)
    }

    /// Random blob, for callers that generate key material externally later
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_BLOB_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_BLOB_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for KeyBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyBlob({}..)", &self.to_hex()[..8])
    }
}

impl Serialize for KeyBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeyBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_blob = String::deserialize(deserializer)?;
        KeyBlob::from_hex(&hex_blob).map_err(serde::de::Error::custom)
    }
}

/// Check `1 <= threshold <= guardians`
pub fn validate_threshold(threshold: u32, guardians: usize) -> Result<(), GuardianError> {
    if threshold == 0 || threshold as usize > guardians {
        return Err(GuardianError::InvalidThreshold {
            threshold,
            guardians,
        });
    }
    Ok(())
}

/// An account protected by guardians
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtectedAccount {
    /// Identity that created the account; also the account's key
    pub owner: Address,
    /// Opaque encrypted key blob
    pub encrypted_key: KeyBlob,
    /// Guardians in insertion order
    guardians: Vec<Address>,
    /// Approvals required for recovery
    threshold: u32,
    /// Set at creation; accounts are never deactivated
    pub is_active: bool,
    pub created_at: Timestamp,
}

impl ProtectedAccount {
    /// Validate and build a new account record
    ///
    /// # Errors
    /// `InvalidThreshold` if the threshold is outside `1..=guardians.len()`,
    /// `DuplicateGuardian` if the list repeats an identity.
    pub fn new(
        owner: Address,
        encrypted_key: KeyBlob,
        guardians: Vec<Address>,
        threshold: u32,
        created_at: Timestamp,
    ) -> Result<Self, GuardianError> {
        validate_threshold(threshold, guardians.len())?;

        let mut sorted = guardians.clone();
        sorted.sort();
        if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(GuardianError::DuplicateGuardian(pair[0].clone()));
        }

        Ok(Self {
            owner,
            encrypted_key,
            guardians,
            threshold,
            is_active: true,
            created_at,
        })
    }

    pub fn guardians(&self) -> &[Address] {
        &self.guardians
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn guardian_count(&self) -> usize {
        self.guardians.len()
    }

    pub fn is_guardian(&self, candidate: &Address) -> bool {
        self.guardians.iter().any(|g| g == candidate)
    }

    pub fn is_owner(&self, candidate: &Address) -> bool {
        &self.owner == candidate
    }

    /// Description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold, self.guardians.len())
    }

    pub(crate) fn add_guardian(&mut self, guardian: Address) -> Result<(), GuardianError> {
        if self.is_guardian(&guardian) {
            return Err(GuardianError::AlreadyGuardian(guardian));
        }
        self.guardians.push(guardian);
        Ok(())
    }

    pub(crate) fn set_threshold(&mut self, threshold: u32) -> Result<(), GuardianError> {
        validate_threshold(threshold, self.guardians.len())?;
        self.threshold = threshold;
        Ok(())
    }
}
