//! Identities and authenticated callers

use crate::clock::Timestamp;
use crate::crypto::{
    hash_parts, public_key_from_hex, public_key_to_address, verify_signature, KeyError, KeyPair,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every signed call message
pub const CALL_DOMAIN: &str = "cryptoguard";

/// Target placeholder for self-scoped operations
pub const SELF_TARGET: &str = "self";

/// An account or guardian identity.
///
/// Addresses derived from keys are Base58Check strings, but the protocol
/// treats any string as an opaque identity and only compares for equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An authenticated caller.
///
/// A `Principal` can only be obtained by proving key possession, by
/// verifying a signed call, or through [`Principal::trusted`] for callers
/// already authenticated by the embedding process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    address: Address,
}

impl Principal {
    /// Caller holding the private key
    pub fn from_key_pair(key_pair: &KeyPair) -> Self {
        Self {
            address: Address::new(key_pair.address()),
        }
    }

    /// Caller vouched for by the embedding process
    pub fn trusted(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Verify a signature over `message` and derive the caller's address
    /// from the public key.
    pub fn authenticate(
        public_key_hex: &str,
        message: &[u8],
        signature_hex: &str,
    ) -> Result<Self, KeyError> {
        let public_key = public_key_from_hex(public_key_hex)?;
        let signature = hex::decode(signature_hex).map_err(|_| KeyError::InvalidSignature)?;

        if !verify_signature(&public_key, message, &signature)? {
            return Err(KeyError::VerificationFailed);
        }

        Ok(Self {
            address: Address::new(public_key_to_address(&public_key)),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

/// Ordered arguments of a remote call.
///
/// Every argument the handler acts on is bound into the signed message, so
/// a signature cannot be reused with different values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallParams {
    parts: Vec<Vec<u8>>,
}

impl CallParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, part: impl AsRef<[u8]>) -> Self {
        self.parts.push(part.as_ref().to_vec());
        self
    }

    pub fn with_u32(self, value: u32) -> Self {
        self.with(value.to_be_bytes())
    }

    pub fn with_u64(self, value: u64) -> Self {
        self.with(value.to_be_bytes())
    }

    /// A list, prefixed with its length
    pub fn with_list<I, P>(self, items: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let items: Vec<P> = items.into_iter().collect();
        items
            .iter()
            .fold(self.with_u64(items.len() as u64), |params, item| params.with(item))
    }

    /// An optional value, tagged so `None` and an empty value differ
    pub fn with_option(self, value: Option<impl AsRef<[u8]>>) -> Self {
        match value {
            Some(v) => self.with([1u8]).with(v),
            None => self.with([0u8]),
        }
    }

    pub fn digest(&self) -> String {
        let parts: Vec<&[u8]> = self.parts.iter().map(Vec::as_slice).collect();
        hash_parts(&parts)
    }
}

/// Canonical message a remote caller signs for one operation
pub fn call_message(
    operation: &str,
    target: &str,
    issued_at: Timestamp,
    params: &CallParams,
) -> Vec<u8> {
    format!(
        "{}:{}:{}:{}:{}",
        CALL_DOMAIN,
        operation,
        target,
        issued_at,
        params.digest()
    )
    .into_bytes()
}

/// Sign a call message, returning the hex signature
pub fn sign_call(
    key_pair: &KeyPair,
    operation: &str,
    target: &str,
    issued_at: Timestamp,
    params: &CallParams,
) -> Result<String, KeyError> {
    let signature = key_pair.sign(&call_message(operation, target, issued_at, params))?;
    Ok(hex::encode(signature))
}
