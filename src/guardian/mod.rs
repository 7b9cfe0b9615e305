//! Guardian and threshold management
//!
//! A protected account delegates emergency authority to a set of guardians.
//! `threshold` of them must approve a recovery; the same threshold bounds
//! guardian management (`1 <= threshold <= guardians`).
//!
//! # Example
//!
//! ```ignore
//! use cryptoguard::guardian::{GuardianRegistry, KeyBlob};
//!
//! // 2-of-3 protection for the caller's account
//! let outcome = registry.create_account(&owner, KeyBlob::random(), guardians, 2, now)?;
//!
//! registry.add_guardian(&owner, owner.address(), new_guardian)?;
//! registry.update_threshold(&owner, owner.address(), 3)?;
//! ```

pub mod account;
pub mod registry;

pub use account::{validate_threshold, GuardianError, KeyBlob, ProtectedAccount, KEY_BLOB_LEN};
pub use registry::GuardianRegistry;
