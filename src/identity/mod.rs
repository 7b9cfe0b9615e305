//! Caller identities
//!
//! Addresses identify accounts and guardians. A [`Principal`] is an
//! address the caller has proven control of; every mutating protocol call
//! takes one.

pub mod keystore;
pub mod principal;

pub use keystore::{Identity, IdentityInfo, Keystore, KeystoreError};
pub use principal::{
    call_message, sign_call, Address, CallParams, Principal, CALL_DOMAIN, SELF_TARGET,
};
