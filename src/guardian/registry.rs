//! Guardian registry
//!
//! Holds every protected account keyed by its owner's identity. Mutations
//! validate fully before touching state, so a failed call leaves the
//! registry unchanged.

use crate::clock::Timestamp;
use crate::events::{Outcome, ProtocolEvent};
use crate::guardian::account::{GuardianError, KeyBlob, ProtectedAccount};
use crate::identity::{Address, Principal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registry of protected accounts
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GuardianRegistry {
    accounts: HashMap<Address, ProtectedAccount>,
}

impl GuardianRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the caller's protected account
    ///
    /// The caller becomes the owner and the account is keyed by the
    /// caller's address.
    pub fn create_account(
        &mut self,
        caller: &Principal,
        encrypted_key: KeyBlob,
        guardians: Vec<Address>,
        threshold: u32,
        now: Timestamp,
    ) -> Result<Outcome<ProtectedAccount>, GuardianError> {
        let owner = caller.address().clone();

        if self.accounts.contains_key(&owner) {
            return Err(GuardianError::DuplicateAccount(owner));
        }

        let account = ProtectedAccount::new(owner.clone(), encrypted_key, guardians, threshold, now)?;
        self.accounts.insert(owner.clone(), account.clone());

        Ok(Outcome::with_event(
            account,
            ProtocolEvent::WalletCreated { account: owner },
        ))
    }

    /// Add a guardian to an account the caller owns
    pub fn add_guardian(
        &mut self,
        caller: &Principal,
        account: &Address,
        guardian: Address,
    ) -> Result<Outcome<usize>, GuardianError> {
        let record = self.owned_mut(caller, account)?;
        record.add_guardian(guardian.clone())?;
        let count = record.guardian_count();

        Ok(Outcome::with_event(
            count,
            ProtocolEvent::GuardianAdded {
                account: account.clone(),
                guardian,
            },
        ))
    }

    /// Change the threshold of an account the caller owns
    pub fn update_threshold(
        &mut self,
        caller: &Principal,
        account: &Address,
        threshold: u32,
    ) -> Result<Outcome<u32>, GuardianError> {
        let record = self.owned_mut(caller, account)?;
        record.set_threshold(threshold)?;

        Ok(Outcome::with_event(
            threshold,
            ProtocolEvent::ThresholdUpdated {
                account: account.clone(),
                threshold,
            },
        ))
    }

    /// Membership query; unknown accounts have no guardians
    pub fn is_guardian(&self, account: &Address, candidate: &Address) -> bool {
        self.accounts
            .get(account)
            .map(|a| a.is_guardian(candidate))
            .unwrap_or(false)
    }

    pub fn get(&self, account: &Address) -> Option<&ProtectedAccount> {
        self.accounts.get(account)
    }

    pub fn threshold_of(&self, account: &Address) -> Option<u32> {
        self.accounts.get(account).map(|a| a.threshold())
    }

    pub fn contains(&self, account: &Address) -> bool {
        self.accounts.contains_key(account)
    }

    /// All accounts, ordered by owner address
    pub fn list_accounts(&self) -> Vec<&ProtectedAccount> {
        let mut accounts: Vec<_> = self.accounts.values().collect();
        accounts.sort_by(|a, b| a.owner.cmp(&b.owner));
        accounts
    }

    /// Accounts the candidate guards, ordered by owner address
    pub fn guarded_by(&self, candidate: &Address) -> Vec<&ProtectedAccount> {
        self.list_accounts()
            .into_iter()
            .filter(|a| a.is_guardian(candidate))
            .collect()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    fn owned_mut(
        &mut self,
        caller: &Principal,
        account: &Address,
    ) -> Result<&mut ProtectedAccount, GuardianError> {
        let record = self
            .accounts
            .get_mut(account)
            .ok_or_else(|| GuardianError::AccountNotFound(account.clone()))?;

        if !record.is_owner(caller.address()) {
            return Err(GuardianError::NotOwner(caller.address().clone()));
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(names: &[&str]) -> Vec<Address> {
        names.iter().map(|n| Address::from(*n)).collect()
    }

    fn owner() -> Principal {
        Principal::trusted("owner")
    }

    fn registry_with_account() -> GuardianRegistry {
        let mut registry = GuardianRegistry::new();
        registry
            .create_account(&owner(), KeyBlob::random(), addrs(&["g1", "g2", "g3"]), 2, 100)
            .unwrap();
        registry
    }

    #[test]
    fn test_create_account_emits_wallet_created() {
        let mut registry = GuardianRegistry::new();
        let outcome = registry
            .create_account(&owner(), KeyBlob::random(), addrs(&["g1", "g2", "g3"]), 2, 100)
            .unwrap();

        assert!(outcome.value.is_active);
        assert_eq!(outcome.value.threshold(), 2);
        assert_eq!(outcome.value.created_at, 100);
        assert_eq!(
            outcome.events,
            vec![ProtocolEvent::WalletCreated {
                account: Address::from("owner")
            }]
        );
        assert_eq!(registry.account_count(), 1);
    }

    #[test]
    fn test_duplicate_account_leaves_state_unchanged() {
        let mut registry = registry_with_account();
        let before = registry.get(&Address::from("owner")).cloned();

        let result =
            registry.create_account(&owner(), KeyBlob::random(), addrs(&["x", "y"]), 1, 200);

        assert_eq!(
            result.unwrap_err(),
            GuardianError::DuplicateAccount(Address::from("owner"))
        );
        assert_eq!(registry.get(&Address::from("owner")).cloned(), before);
    }

    #[test]
    fn test_duplicate_account_checked_before_threshold() {
        let mut registry = registry_with_account();
        let result = registry.create_account(&owner(), KeyBlob::random(), addrs(&["x"]), 5, 0);
        assert!(matches!(result, Err(GuardianError::DuplicateAccount(_))));
    }

    #[test]
    fn test_threshold_above_guardian_count() {
        let mut registry = GuardianRegistry::new();
        let result =
            registry.create_account(&owner(), KeyBlob::random(), addrs(&["g1", "g2"]), 3, 0);

        assert!(matches!(
            result,
            Err(GuardianError::InvalidThreshold { threshold: 3, .. })
        ));
        assert_eq!(registry.account_count(), 0);
    }

    #[test]
    fn test_add_guardian() {
        let mut registry = registry_with_account();
        let account = Address::from("owner");

        let outcome = registry
            .add_guardian(&owner(), &account, Address::from("g4"))
            .unwrap();

        assert_eq!(outcome.value, 4);
        assert_eq!(
            outcome.events,
            vec![ProtocolEvent::GuardianAdded {
                account: account.clone(),
                guardian: Address::from("g4")
            }]
        );
        assert!(registry.is_guardian(&account, &Address::from("g4")));
    }

    #[test]
    fn test_add_existing_guardian_fails() {
        let mut registry = registry_with_account();
        let account = Address::from("owner");

        let result = registry.add_guardian(&owner(), &account, Address::from("g1"));

        assert_eq!(
            result.unwrap_err(),
            GuardianError::AlreadyGuardian(Address::from("g1"))
        );
        assert_eq!(registry.get(&account).unwrap().guardian_count(), 3);
    }

    #[test]
    fn test_only_owner_may_edit() {
        let mut registry = registry_with_account();
        let account = Address::from("owner");
        let intruder = Principal::trusted("g1");

        assert_eq!(
            registry
                .add_guardian(&intruder, &account, Address::from("g9"))
                .unwrap_err(),
            GuardianError::NotOwner(Address::from("g1"))
        );
        assert!(matches!(
            registry.update_threshold(&intruder, &account, 1),
            Err(GuardianError::NotOwner(_))
        ));
    }

    #[test]
    fn test_edit_unknown_account() {
        let mut registry = GuardianRegistry::new();
        let result = registry.update_threshold(&owner(), &Address::from("owner"), 1);
        assert!(matches!(result, Err(GuardianError::AccountNotFound(_))));
    }

    #[test]
    fn test_update_threshold() {
        let mut registry = registry_with_account();
        let account = Address::from("owner");

        let outcome = registry.update_threshold(&owner(), &account, 3).unwrap();
        assert_eq!(
            outcome.events,
            vec![ProtocolEvent::ThresholdUpdated {
                account: account.clone(),
                threshold: 3
            }]
        );
        assert_eq!(registry.threshold_of(&account), Some(3));

        assert!(matches!(
            registry.update_threshold(&owner(), &account, 4),
            Err(GuardianError::InvalidThreshold { .. })
        ));
        assert_eq!(registry.threshold_of(&account), Some(3));
    }

    #[test]
    fn test_is_guardian_queries() {
        let registry = registry_with_account();
        let account = Address::from("owner");

        assert!(registry.is_guardian(&account, &Address::from("g2")));
        assert!(!registry.is_guardian(&account, &Address::from("owner")));
        assert!(!registry.is_guardian(&Address::from("nobody"), &Address::from("g2")));
    }

    #[test]
    fn test_guarded_by() {
        let mut registry = registry_with_account();
        registry
            .create_account(
                &Principal::trusted("other"),
                KeyBlob::random(),
                addrs(&["g1"]),
                1,
                0,
            )
            .unwrap();

        assert_eq!(registry.guarded_by(&Address::from("g1")).len(), 2);
        assert_eq!(registry.guarded_by(&Address::from("g3")).len(), 1);
    }
}
