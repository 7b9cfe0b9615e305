//! CryptoGuard: guardian-based account protection in Rust
//!
//! This crate provides:
//! - Protected accounts with a guardian set and approval threshold
//! - A per-account transfer pattern and anomaly gate
//! - Time-bounded guardian recovery with quorum approval
//! - A hash-chained ledger of every emitted event
//! - secp256k1 identities and signed remote calls
//! - JSON persistence with rotating backups
//! - A REST API with a WebSocket event stream
//!
//! # Example
//!
//! ```rust
//! use cryptoguard::guardian::KeyBlob;
//! use cryptoguard::identity::{Address, Principal};
//! use cryptoguard::protocol::AccountManager;
//!
//! let mut manager = AccountManager::default();
//! let owner = Principal::trusted("alice");
//! let guardians = vec![Address::from("bob"), Address::from("carol")];
//!
//! // 2-of-2 protection for alice
//! manager
//!     .create_account(&owner, KeyBlob::random(), guardians, 2)
//!     .unwrap();
//!
//! // bob starts recovery, both guardians approve
//! let account = owner.address().clone();
//! let bob = Principal::trusted("bob");
//! let carol = Principal::trusted("carol");
//! manager.initiate_recovery(&bob, &account).unwrap();
//! manager.approve_recovery(&bob, &account).unwrap();
//! let receipt = manager.approve_recovery(&carol, &account).unwrap();
//! assert!(receipt.value.is_completed());
//! ```

pub mod api;
pub mod cli;
pub mod clock;
pub mod crypto;
pub mod events;
pub mod guardian;
pub mod identity;
pub mod monitor;
pub mod protocol;
pub mod recovery;
pub mod storage;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use crypto::KeyPair;
pub use events::{EventLog, EventRecord, ProtocolEvent};
pub use guardian::{GuardianError, GuardianRegistry, KeyBlob, ProtectedAccount};
pub use identity::{Address, Keystore, Principal};
pub use monitor::{AnomalyMonitor, AnomalyReason, MonitorError, TransactionPattern, TransferDecision};
pub use protocol::{AccountManager, ProtocolConfig, ProtocolError, Receipt};
pub use recovery::{RecoveryCoordinator, RecoveryError, RecoveryRequest, RecoveryStatus};
pub use storage::{Storage, StorageConfig};
