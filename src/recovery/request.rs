//! Recovery request state

use crate::clock::Timestamp;
use crate::identity::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Approval window measured from initiation (7 days)
pub const RECOVERY_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Recovery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("Not a guardian: {0}")]
    NotGuardian(Address),

    #[error("Recovery already in progress for {0}")]
    RecoveryInProgress(Address),

    #[error("No active recovery for {0}")]
    NoActiveRecovery(Address),

    #[error("Already approved: {0}")]
    AlreadyApproved(Address),

    #[error("Recovery timeout: deadline {deadline}, now {now}")]
    RecoveryTimeout { deadline: Timestamp, now: Timestamp },

    #[error("Recovery not expired: deadline {deadline}, now {now}")]
    RecoveryNotExpired { deadline: Timestamp, now: Timestamp },
}

/// Lifecycle of a recovery request
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecoveryStatus {
    /// Collecting approvals
    Active,
    /// Approvals reached the threshold
    Completed,
    /// Closed after the deadline passed
    Expired,
}

/// Result of a successful approval
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Recorded; quorum not reached yet
    Approved { approvals: usize, threshold: u32 },
    /// This approval reached quorum
    Completed { approvals: usize },
}

impl ApprovalOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ApprovalOutcome::Completed { .. })
    }
}

/// A recovery request for one protected account
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub account: Address,
    /// Guardian that opened the request
    pub initiator: Address,
    pub initiated_at: Timestamp,
    /// Approving guardians, in approval order
    approvals: Vec<Address>,
    pub status: RecoveryStatus,
    /// Set when quorum was reached
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    /// Approval window length this request was opened with
    pub timeout_secs: u64,
}

impl RecoveryRequest {
    pub fn new(account: Address, initiator: Address, now: Timestamp, timeout_secs: u64) -> Self {
        Self {
            account,
            initiator,
            initiated_at: now,
            approvals: Vec::new(),
            status: RecoveryStatus::Active,
            completed_at: None,
            timeout_secs,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RecoveryStatus::Active
    }

    /// Last second at which approvals are accepted
    pub fn deadline(&self) -> Timestamp {
        self.initiated_at.saturating_add(self.timeout_secs)
    }

    pub fn is_timed_out(&self, now: Timestamp) -> bool {
        now > self.deadline()
    }

    pub fn approvals(&self) -> &[Address] {
        &self.approvals
    }

    pub fn approval_count(&self) -> usize {
        self.approvals.len()
    }

    pub fn has_approved(&self, guardian: &Address) -> bool {
        self.approvals.contains(guardian)
    }

    /// Record an approval and close the request once `threshold` is met
    ///
    /// The caller must already be known to be a guardian of the account.
    pub fn add_approval(
        &mut self,
        guardian: Address,
        threshold: u32,
        now: Timestamp,
    ) -> Result<ApprovalOutcome, RecoveryError> {
        if !self.is_active() {
            return Err(RecoveryError::NoActiveRecovery(self.account.clone()));
        }

        if self.is_timed_out(now) {
            return Err(RecoveryError::RecoveryTimeout {
                deadline: self.deadline(),
                now,
            });
        }

        if self.has_approved(&guardian) {
            return Err(RecoveryError::AlreadyApproved(guardian));
        }

        self.approvals.push(guardian);

        if self.approvals.len() >= threshold as usize {
            self.status = RecoveryStatus::Completed;
            self.completed_at = Some(now);
            return Ok(ApprovalOutcome::Completed {
                approvals: self.approvals.len(),
            });
        }

        Ok(ApprovalOutcome::Approved {
            approvals: self.approvals.len(),
            threshold,
        })
    }

    /// Close a request whose deadline has passed
    pub fn expire(&mut self, now: Timestamp) -> Result<(), RecoveryError> {
        if !self.is_active() {
            return Err(RecoveryError::NoActiveRecovery(self.account.clone()));
        }

        if !self.is_timed_out(now) {
            return Err(RecoveryError::RecoveryNotExpired {
                deadline: self.deadline(),
                now,
            });
        }

        self.status = RecoveryStatus::Expired;
        Ok(())
    }
}

/// Read-only view returned by the recovery query
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoverySnapshot {
    pub account: Address,
    pub is_active: bool,
    pub status: RecoveryStatus,
    pub initiator: Address,
    pub initiated_at: Timestamp,
    pub deadline: Timestamp,
    pub approvals: Vec<Address>,
    pub approval_count: usize,
    pub completed_at: Option<Timestamp>,
}

impl From<&RecoveryRequest> for RecoverySnapshot {
    fn from(request: &RecoveryRequest) -> Self {
        Self {
            account: request.account.clone(),
            is_active: request.is_active(),
            status: request.status,
            initiator: request.initiator.clone(),
            initiated_at: request.initiated_at,
            deadline: request.deadline(),
            approvals: request.approvals.clone(),
            approval_count: request.approval_count(),
            completed_at: request.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RecoveryRequest {
        RecoveryRequest::new(
            Address::from("wallet"),
            Address::from("g0"),
            1_000,
            RECOVERY_TIMEOUT_SECS,
        )
    }

    #[test]
    fn test_new_request_is_active_without_approvals() {
        let request = request();
        assert!(request.is_active());
        assert_eq!(request.approval_count(), 0);
        assert!(!request.has_approved(&Address::from("g0")));
        assert_eq!(request.deadline(), 1_000 + RECOVERY_TIMEOUT_SECS);
    }

    #[test]
    fn test_add_approval_until_quorum() {
        let mut request = request();

        let first = request.add_approval(Address::from("g1"), 2, 1_100).unwrap();
        assert_eq!(
            first,
            ApprovalOutcome::Approved {
                approvals: 1,
                threshold: 2
            }
        );
        assert!(request.is_active());

        let second = request.add_approval(Address::from("g2"), 2, 1_200).unwrap();
        assert!(second.is_completed());
        assert_eq!(request.status, RecoveryStatus::Completed);
        assert_eq!(request.completed_at, Some(1_200));

        let late = request.add_approval(Address::from("g3"), 2, 1_300);
        assert!(matches!(late, Err(RecoveryError::NoActiveRecovery(_))));
    }

    #[test]
    fn test_duplicate_approval() {
        let mut request = request();
        request.add_approval(Address::from("g1"), 3, 1_100).unwrap();

        let result = request.add_approval(Address::from("g1"), 3, 1_200);
        assert_eq!(
            result.unwrap_err(),
            RecoveryError::AlreadyApproved(Address::from("g1"))
        );
        assert_eq!(request.approval_count(), 1);
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let mut request = request();
        let deadline = request.deadline();

        assert!(!request.is_timed_out(deadline));
        assert!(request.add_approval(Address::from("g1"), 3, deadline).is_ok());

        let result = request.add_approval(Address::from("g2"), 3, deadline + 1);
        assert_eq!(
            result.unwrap_err(),
            RecoveryError::RecoveryTimeout {
                deadline,
                now: deadline + 1
            }
        );
        assert_eq!(request.approvals(), &[Address::from("g1")]);
        assert!(request.is_active());
    }

    #[test]
    fn test_expire_only_after_deadline() {
        let mut request = request();
        let deadline = request.deadline();

        assert!(matches!(
            request.expire(deadline),
            Err(RecoveryError::RecoveryNotExpired { .. })
        ));
        request.expire(deadline + 1).unwrap();
        assert_eq!(request.status, RecoveryStatus::Expired);
        assert!(!request.is_active());
        assert!(matches!(
            request.expire(deadline + 2),
            Err(RecoveryError::NoActiveRecovery(_))
        ));
    }

    #[test]
    fn test_snapshot() {
        let mut request = request();
        request.add_approval(Address::from("g2"), 2, 1_100).unwrap();

        let snapshot = RecoverySnapshot::from(&request);
        assert!(snapshot.is_active);
        assert_eq!(snapshot.initiator, Address::from("g0"));
        assert_eq!(snapshot.approval_count, 1);
        assert_eq!(snapshot.deadline, request.deadline());
    }
}
