//! Recovery coordinator
//!
//! One request per protected account. Guardian eligibility and the quorum
//! threshold are read from the [`GuardianRegistry`] at call time, so a
//! threshold change made while a request is open applies to the next
//! approval.

use crate::clock::Timestamp;
use crate::events::{Outcome, ProtocolEvent};
use crate::guardian::GuardianRegistry;
use crate::identity::{Address, Principal};
use crate::recovery::request::{
    ApprovalOutcome, RecoveryError, RecoveryRequest, RecoverySnapshot, RECOVERY_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_timeout() -> u64 {
    RECOVERY_TIMEOUT_SECS
}

/// Tracks the latest recovery request of every account
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryCoordinator {
    requests: HashMap<Address, RecoveryRequest>,
    #[serde(default = "default_timeout")]
    timeout_secs: u64,
}

impl Default for RecoveryCoordinator {
    fn default() -> Self {
        Self::new(RECOVERY_TIMEOUT_SECS)
    }
}

impl RecoveryCoordinator {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            requests: HashMap::new(),
            timeout_secs,
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Open a recovery request for `account`
    pub fn initiate(
        &mut self,
        registry: &GuardianRegistry,
        caller: &Principal,
        account: &Address,
        now: Timestamp,
    ) -> Result<Outcome<RecoverySnapshot>, RecoveryError> {
        let guardian = Self::require_guardian(registry, caller, account)?;

        if self.requests.get(account).map(|r| r.is_active()).unwrap_or(false) {
            return Err(RecoveryError::RecoveryInProgress(account.clone()));
        }

        let request = RecoveryRequest::new(account.clone(), guardian.clone(), now, self.timeout_secs);
        let snapshot = RecoverySnapshot::from(&request);
        // a closed request is replaced by the new cycle
        self.requests.insert(account.clone(), request);

        Ok(Outcome::with_event(
            snapshot,
            ProtocolEvent::RecoveryInitiated {
                account: account.clone(),
                guardian,
            },
        ))
    }

    /// Approve the active request; the approval reaching quorum completes it
    pub fn approve(
        &mut self,
        registry: &GuardianRegistry,
        caller: &Principal,
        account: &Address,
        now: Timestamp,
    ) -> Result<Outcome<ApprovalOutcome>, RecoveryError> {
        let guardian = Self::require_guardian(registry, caller, account)?;
        let threshold = registry
            .threshold_of(account)
            .ok_or_else(|| RecoveryError::NotGuardian(guardian.clone()))?;

        let request = self
            .requests
            .get_mut(account)
            .ok_or_else(|| RecoveryError::NoActiveRecovery(account.clone()))?;

        let approval = request.add_approval(guardian.clone(), threshold, now)?;

        let mut outcome = Outcome::with_event(
            approval,
            ProtocolEvent::RecoveryApproved {
                account: account.clone(),
                guardian,
            },
        );
        if approval.is_completed() {
            outcome.emit(ProtocolEvent::RecoveryCompleted {
                account: account.clone(),
            });
        }

        Ok(outcome)
    }

    /// Close an active request whose approval window has elapsed
    pub fn expire(
        &mut self,
        registry: &GuardianRegistry,
        caller: &Principal,
        account: &Address,
        now: Timestamp,
    ) -> Result<Outcome<RecoverySnapshot>, RecoveryError> {
        Self::require_guardian(registry, caller, account)?;

        let request = self
            .requests
            .get_mut(account)
            .ok_or_else(|| RecoveryError::NoActiveRecovery(account.clone()))?;
        request.expire(now)?;

        Ok(Outcome::with_event(
            RecoverySnapshot::from(&*request),
            ProtocolEvent::RecoveryExpired {
                account: account.clone(),
            },
        ))
    }

    pub fn request(&self, account: &Address) -> Option<&RecoveryRequest> {
        self.requests.get(account)
    }

    pub fn snapshot(&self, account: &Address) -> Option<RecoverySnapshot> {
        self.requests.get(account).map(RecoverySnapshot::from)
    }

    pub fn active_count(&self) -> usize {
        self.requests.values().filter(|r| r.is_active()).count()
    }

    fn require_guardian(
        registry: &GuardianRegistry,
        caller: &Principal,
        account: &Address,
    ) -> Result<Address, RecoveryError> {
        let guardian = caller.address();
        if !registry.is_guardian(account, guardian) {
            return Err(RecoveryError::NotGuardian(guardian.clone()));
        }
        Ok(guardian.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardian::KeyBlob;
    use crate::recovery::request::RecoveryStatus;

    const START: Timestamp = 1_700_000_000;

    fn guardian(name: &str) -> Principal {
        Principal::trusted(name)
    }

    fn wallet() -> Address {
        Address::from("owner")
    }

    fn setup() -> (GuardianRegistry, RecoveryCoordinator) {
        let mut registry = GuardianRegistry::new();
        let guardians = ["g0", "g1", "g2"].iter().map(|g| Address::from(*g)).collect();
        registry
            .create_account(&Principal::trusted("owner"), KeyBlob::random(), guardians, 2, START)
            .unwrap();
        (registry, RecoveryCoordinator::default())
    }

    #[test]
    fn test_initiate_requires_guardian() {
        let (registry, mut coordinator) = setup();

        let result = coordinator.initiate(&registry, &guardian("owner"), &wallet(), START);
        assert_eq!(
            result.unwrap_err(),
            RecoveryError::NotGuardian(Address::from("owner"))
        );
        assert!(coordinator.request(&wallet()).is_none());
    }

    #[test]
    fn test_initiate_twice_fails() {
        let (registry, mut coordinator) = setup();

        let outcome = coordinator
            .initiate(&registry, &guardian("g0"), &wallet(), START)
            .unwrap();
        assert!(outcome.value.is_active);
        assert_eq!(outcome.value.approval_count, 0);
        assert_eq!(
            outcome.events,
            vec![ProtocolEvent::RecoveryInitiated {
                account: wallet(),
                guardian: Address::from("g0")
            }]
        );

        let second = coordinator.initiate(&registry, &guardian("g1"), &wallet(), START + 1);
        assert_eq!(
            second.unwrap_err(),
            RecoveryError::RecoveryInProgress(wallet())
        );
        assert_eq!(
            coordinator.request(&wallet()).unwrap().initiator,
            Address::from("g0")
        );
    }

    #[test]
    fn test_two_of_three_recovery() {
        let (registry, mut coordinator) = setup();
        coordinator
            .initiate(&registry, &guardian("g0"), &wallet(), START)
            .unwrap();

        let first = coordinator
            .approve(&registry, &guardian("g1"), &wallet(), START + 10)
            .unwrap();
        assert!(!first.value.is_completed());
        assert_eq!(first.events.len(), 1);
        assert!(coordinator.request(&wallet()).unwrap().is_active());

        let again = coordinator.approve(&registry, &guardian("g1"), &wallet(), START + 20);
        assert_eq!(
            again.unwrap_err(),
            RecoveryError::AlreadyApproved(Address::from("g1"))
        );

        let second = coordinator
            .approve(&registry, &guardian("g2"), &wallet(), START + 30)
            .unwrap();
        assert!(second.value.is_completed());
        assert_eq!(
            second.events,
            vec![
                ProtocolEvent::RecoveryApproved {
                    account: wallet(),
                    guardian: Address::from("g2")
                },
                ProtocolEvent::RecoveryCompleted { account: wallet() },
            ]
        );

        let request = coordinator.request(&wallet()).unwrap();
        assert!(!request.is_active());
        assert_eq!(request.status, RecoveryStatus::Completed);
    }

    #[test]
    fn test_initiator_must_approve_explicitly() {
        let (registry, mut coordinator) = setup();
        coordinator
            .initiate(&registry, &guardian("g0"), &wallet(), START)
            .unwrap();

        let outcome = coordinator
            .approve(&registry, &guardian("g0"), &wallet(), START + 1)
            .unwrap();
        assert!(!outcome.value.is_completed());
        assert_eq!(coordinator.request(&wallet()).unwrap().approval_count(), 1);
    }

    #[test]
    fn test_approve_without_request() {
        let (registry, mut coordinator) = setup();
        let result = coordinator.approve(&registry, &guardian("g1"), &wallet(), START);
        assert_eq!(result.unwrap_err(), RecoveryError::NoActiveRecovery(wallet()));
    }

    #[test]
    fn test_non_guardian_checked_first() {
        let (registry, mut coordinator) = setup();
        let result = coordinator.approve(&registry, &guardian("mallory"), &wallet(), START);
        assert!(matches!(result, Err(RecoveryError::NotGuardian(_))));
    }

    #[test]
    fn test_approval_after_timeout() {
        let (registry, mut coordinator) = setup();
        coordinator
            .initiate(&registry, &guardian("g0"), &wallet(), START)
            .unwrap();

        let late = START + RECOVERY_TIMEOUT_SECS + 1;
        let result = coordinator.approve(&registry, &guardian("g1"), &wallet(), late);

        assert!(matches!(result, Err(RecoveryError::RecoveryTimeout { .. })));
        let request = coordinator.request(&wallet()).unwrap();
        assert_eq!(request.approval_count(), 0);
        assert!(request.is_active());

        // still blocks a new cycle until expired
        assert!(matches!(
            coordinator.initiate(&registry, &guardian("g1"), &wallet(), late),
            Err(RecoveryError::RecoveryInProgress(_))
        ));
    }

    #[test]
    fn test_expire_then_restart() {
        let (registry, mut coordinator) = setup();
        coordinator
            .initiate(&registry, &guardian("g0"), &wallet(), START)
            .unwrap();

        let early = coordinator.expire(&registry, &guardian("g1"), &wallet(), START + 5);
        assert!(matches!(early, Err(RecoveryError::RecoveryNotExpired { .. })));

        let late = START + RECOVERY_TIMEOUT_SECS + 1;
        let outcome = coordinator
            .expire(&registry, &guardian("g1"), &wallet(), late)
            .unwrap();
        assert_eq!(outcome.value.status, RecoveryStatus::Expired);
        assert_eq!(
            outcome.events,
            vec![ProtocolEvent::RecoveryExpired { account: wallet() }]
        );

        let restarted = coordinator
            .initiate(&registry, &guardian("g2"), &wallet(), late + 1)
            .unwrap();
        assert_eq!(restarted.value.initiator, Address::from("g2"));
        assert_eq!(coordinator.active_count(), 1);
    }

    #[test]
    fn test_threshold_read_at_approval_time() {
        let (mut registry, mut coordinator) = setup();
        coordinator
            .initiate(&registry, &guardian("g0"), &wallet(), START)
            .unwrap();
        coordinator
            .approve(&registry, &guardian("g1"), &wallet(), START + 1)
            .unwrap();

        registry
            .update_threshold(&Principal::trusted("owner"), &wallet(), 3)
            .unwrap();

        let outcome = coordinator
            .approve(&registry, &guardian("g2"), &wallet(), START + 2)
            .unwrap();
        assert!(!outcome.value.is_completed());
    }

    #[test]
    fn test_queries_do_not_mutate() {
        let (registry, mut coordinator) = setup();
        coordinator
            .initiate(&registry, &guardian("g0"), &wallet(), START)
            .unwrap();

        let first = coordinator.snapshot(&wallet());
        let second = coordinator.snapshot(&wallet());
        assert_eq!(first, second);
        assert!(registry.is_guardian(&wallet(), &Address::from("g1")));
        assert!(registry.is_guardian(&wallet(), &Address::from("g1")));
    }
}
