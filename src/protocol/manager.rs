//! Account manager
//!
//! The single entry point for every protocol call. Each call reads the
//! clock once, runs against the component that owns the affected record,
//! and appends the events it produced to the ledger before returning.
//! Calls take `&mut self`, so a shared manager must be wrapped in a lock
//! and mutations are applied one at a time in arrival order.

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::events::{EventLog, EventLogError, EventRecord, Outcome};
use crate::guardian::{GuardianError, GuardianRegistry, KeyBlob, ProtectedAccount};
use crate::identity::{Address, Principal};
use crate::monitor::{AnomalyMonitor, MonitorError, TransactionPattern, TransferDecision};
use crate::protocol::config::ProtocolConfig;
use crate::recovery::{ApprovalOutcome, RecoveryCoordinator, RecoveryError, RecoverySnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Any rejection of a protocol call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Guardian error: {0}")]
    Guardian(#[from] GuardianError),
    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),
    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A call's value and the ledger records it appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt<T> {
    pub value: T,
    pub events: Vec<EventRecord>,
}

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Protocol state and its event ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountManager {
    config: ProtocolConfig,
    registry: GuardianRegistry,
    monitor: AnomalyMonitor,
    recovery: RecoveryCoordinator,
    events: EventLog,
    #[serde(skip, default = "system_clock")]
    clock: Arc<dyn Clock>,
}

impl Default for AccountManager {
    fn default() -> Self {
        Self::new(ProtocolConfig::default())
    }
}

impl AccountManager {
    /// Create empty protocol state on the system clock
    pub fn new(config: ProtocolConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: ProtocolConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            registry: GuardianRegistry::new(),
            monitor: AnomalyMonitor::new(config.history_capacity),
            recovery: RecoveryCoordinator::new(config.recovery_timeout_secs),
            events: EventLog::new(),
            clock,
        }
    }

    /// Replace the clock, e.g. after loading persisted state
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Guardian management
    // ------------------------------------------------------------------

    /// Create the caller's protected account
    pub fn create_account(
        &mut self,
        caller: &Principal,
        encrypted_key: KeyBlob,
        guardians: Vec<Address>,
        threshold: u32,
    ) -> ProtocolResult<Receipt<ProtectedAccount>> {
        let now = self.now();
        let outcome = self
            .registry
            .create_account(caller, encrypted_key, guardians, threshold, now)?;

        log::info!(
            "Created protected account {} ({})",
            caller.address(),
            outcome.value.description()
        );
        Ok(self.commit(now, outcome))
    }

    /// Add a guardian to an account the caller owns
    pub fn add_guardian(
        &mut self,
        caller: &Principal,
        account: &Address,
        guardian: Address,
    ) -> ProtocolResult<Receipt<usize>> {
        let now = self.now();
        let outcome = self.registry.add_guardian(caller, account, guardian)?;

        log::info!("Account {} now has {} guardians", account, outcome.value);
        Ok(self.commit(now, outcome))
    }

    /// Change the threshold of an account the caller owns
    pub fn update_threshold(
        &mut self,
        caller: &Principal,
        account: &Address,
        threshold: u32,
    ) -> ProtocolResult<Receipt<u32>> {
        let now = self.now();
        let outcome = self.registry.update_threshold(caller, account, threshold)?;

        log::info!("Account {} threshold set to {}", account, threshold);
        Ok(self.commit(now, outcome))
    }

    // ------------------------------------------------------------------
    // Anomaly monitoring
    // ------------------------------------------------------------------

    /// Set the caller's own transfer pattern
    pub fn set_pattern(
        &mut self,
        caller: &Principal,
        frequency: u32,
        max_amount: u128,
        time_window: u64,
    ) -> Receipt<TransactionPattern> {
        let now = self.now();
        let outcome = self
            .monitor
            .set_pattern(caller, frequency, max_amount, time_window);

        log::info!(
            "Pattern for {}: {} transfer(s) per {}s, max {}",
            caller.address(),
            frequency,
            time_window,
            max_amount
        );
        self.commit(now, outcome)
    }

    /// Run the anomaly gate for a transfer of `amount` from `account`
    pub fn check_transaction(
        &mut self,
        account: &Address,
        amount: u128,
    ) -> ProtocolResult<Receipt<TransferDecision>> {
        let now = self.now();
        let outcome = self.monitor.check_transaction(account, amount, now)?;

        if let TransferDecision::Denied(reason) = outcome.value {
            log::warn!("Transfer of {} from {} denied: {}", amount, account, reason);
        }
        Ok(self.commit(now, outcome))
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    pub fn initiate_recovery(
        &mut self,
        caller: &Principal,
        account: &Address,
    ) -> ProtocolResult<Receipt<RecoverySnapshot>> {
        let now = self.now();
        let outcome = self
            .recovery
            .initiate(&self.registry, caller, account, now)
            .map_err(|e| Self::rejected("initiate", account, e))?;

        log::info!("Recovery of {} initiated by {}", account, caller.address());
        Ok(self.commit(now, outcome))
    }

    pub fn approve_recovery(
        &mut self,
        caller: &Principal,
        account: &Address,
    ) -> ProtocolResult<Receipt<ApprovalOutcome>> {
        let now = self.now();
        let outcome = self
            .recovery
            .approve(&self.registry, caller, account, now)
            .map_err(|e| Self::rejected("approve", account, e))?;

        match outcome.value {
            ApprovalOutcome::Approved {
                approvals,
                threshold,
            } => log::info!(
                "Recovery of {} approved by {} ({}/{})",
                account,
                caller.address(),
                approvals,
                threshold
            ),
            ApprovalOutcome::Completed { approvals } => log::info!(
                "Recovery of {} completed with {} approvals",
                account,
                approvals
            ),
        }
        Ok(self.commit(now, outcome))
    }

    pub fn expire_recovery(
        &mut self,
        caller: &Principal,
        account: &Address,
    ) -> ProtocolResult<Receipt<RecoverySnapshot>> {
        let now = self.now();
        let outcome = self
            .recovery
            .expire(&self.registry, caller, account, now)
            .map_err(|e| Self::rejected("expire", account, e))?;

        log::info!("Recovery of {} expired by {}", account, caller.address());
        Ok(self.commit(now, outcome))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn is_guardian(&self, account: &Address, candidate: &Address) -> bool {
        self.registry.is_guardian(account, candidate)
    }

    pub fn account(&self, account: &Address) -> Option<&ProtectedAccount> {
        self.registry.get(account)
    }

    pub fn guardians(&self, account: &Address) -> Option<&[Address]> {
        self.registry.get(account).map(|a| a.guardians())
    }

    pub fn accounts(&self) -> Vec<&ProtectedAccount> {
        self.registry.list_accounts()
    }

    /// Accounts the address is a guardian of
    pub fn guarded_by(&self, guardian: &Address) -> Vec<&ProtectedAccount> {
        self.registry.guarded_by(guardian)
    }

    pub fn pattern(&self, account: &Address) -> Option<&TransactionPattern> {
        self.monitor.pattern(account)
    }

    /// Allowed transfers inside the account's current window
    pub fn recent_transfers(&self, account: &Address) -> usize {
        self.monitor.recent_transfers(account, self.now())
    }

    pub fn recovery_request(&self, account: &Address) -> Option<RecoverySnapshot> {
        self.recovery.snapshot(account)
    }

    /// Event records with sequence number `>= since`
    pub fn events(&self, since: u64) -> &[EventRecord] {
        self.events.since(since)
    }

    /// Records with `seq >= since` concerning one account
    pub fn account_events(&self, account: &Address, since: u64) -> Vec<&EventRecord> {
        self.events
            .for_account(account)
            .into_iter()
            .filter(|r| r.seq >= since)
            .collect()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    /// Recompute the ledger hash chain
    pub fn verify_events(&self) -> ProtocolResult<()> {
        self.events.verify()?;
        Ok(())
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            accounts: self.registry.account_count(),
            patterns: self.monitor.pattern_count(),
            active_recoveries: self.recovery.active_count(),
            events: self.events.len(),
            latest_hash: self.events.latest_hash(),
        }
    }

    fn commit<T>(&mut self, now: Timestamp, outcome: Outcome<T>) -> Receipt<T> {
        let events = outcome
            .events
            .into_iter()
            .map(|event| self.events.append(now, event).clone())
            .collect();

        Receipt {
            value: outcome.value,
            events,
        }
    }

    fn rejected(operation: &str, account: &Address, err: RecoveryError) -> RecoveryError {
        log::warn!("Recovery {} for {} rejected: {}", operation, account, err);
        err
    }
}

/// Summary counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub accounts: usize,
    pub patterns: usize,
    pub active_recoveries: usize,
    pub events: usize,
    pub latest_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::KeyPair;
    use crate::events::ProtocolEvent;
    use crate::monitor::AnomalyReason;
    use crate::recovery::RECOVERY_TIMEOUT_SECS;

    const ETHER: u128 = 1_000_000_000_000_000_000;

    struct Fixture {
        manager: AccountManager,
        clock: ManualClock,
        owner: Principal,
        guardians: Vec<Principal>,
    }

    impl Fixture {
        fn account(&self) -> Address {
            self.owner.address().clone()
        }
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(1_700_000_000);
        let mut manager =
            AccountManager::with_clock(ProtocolConfig::default(), Arc::new(clock.clone()));

        let owner = Principal::from_key_pair(&KeyPair::generate());
        let guardians: Vec<Principal> = (0..3)
            .map(|_| Principal::from_key_pair(&KeyPair::generate()))
            .collect();
        let addresses = guardians.iter().map(|g| g.address().clone()).collect();

        manager
            .create_account(&owner, KeyBlob::random(), addresses, 2)
            .unwrap();

        Fixture {
            manager,
            clock,
            owner,
            guardians,
        }
    }

    #[test]
    fn test_create_account_records_event() {
        let f = fixture();

        let records = f.manager.events(0);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].event,
            ProtocolEvent::WalletCreated {
                account: f.account()
            }
        );
        assert_eq!(records[0].timestamp, 1_700_000_000);
        assert!(f.manager.account(&f.account()).unwrap().is_active);
    }

    #[test]
    fn test_failed_call_appends_nothing() {
        let mut f = fixture();
        let owner = f.owner.clone();

        let result = f
            .manager
            .create_account(&owner, KeyBlob::random(), vec![Address::from("x")], 1);

        assert!(matches!(
            result,
            Err(ProtocolError::Guardian(GuardianError::DuplicateAccount(_)))
        ));
        assert_eq!(f.manager.event_log().len(), 1);
    }

    #[test]
    fn test_guardian_management() {
        let mut f = fixture();
        let owner = f.owner.clone();
        let account = f.account();
        let newcomer = Address::from("newcomer");

        let receipt = f
            .manager
            .add_guardian(&owner, &account, newcomer.clone())
            .unwrap();
        assert_eq!(receipt.value, 4);
        assert_eq!(receipt.events[0].seq, 1);
        assert!(f.manager.is_guardian(&account, &newcomer));

        f.manager.update_threshold(&owner, &account, 4).unwrap();
        assert_eq!(f.manager.account(&account).unwrap().threshold(), 4);
        assert_eq!(f.manager.guardians(&account).unwrap().len(), 4);
    }

    #[test]
    fn test_transfer_gate() {
        let mut f = fixture();
        let owner = f.owner.clone();
        let account = f.account();

        let receipt = f.manager.set_pattern(&owner, 1, ETHER, 3600);
        assert!(receipt.events.is_empty());

        let allowed = f.manager.check_transaction(&account, ETHER / 2).unwrap();
        assert!(allowed.value.is_allowed());
        assert!(allowed.events.is_empty());

        f.clock.advance(10);
        let denied = f.manager.check_transaction(&account, ETHER / 2).unwrap();
        assert_eq!(denied.value.reason(), Some(AnomalyReason::TooFrequent));
        assert_eq!(denied.events.len(), 1);

        let too_big = f.manager.check_transaction(&account, 2 * ETHER).unwrap();
        assert_eq!(
            too_big.events[0].event,
            ProtocolEvent::SuspiciousActivity {
                account: account.clone(),
                reason: "Amount exceeds maximum".to_string()
            }
        );

        f.clock.advance(3600);
        assert!(f.manager.check_transaction(&account, 1).unwrap().value.is_allowed());
    }

    #[test]
    fn test_check_without_pattern() {
        let mut f = fixture();
        let result = f.manager.check_transaction(&Address::from("nobody"), 1);
        assert!(matches!(
            result,
            Err(ProtocolError::Monitor(MonitorError::PatternNotSet(_)))
        ));
    }

    #[test]
    fn test_full_recovery_flow() {
        let mut f = fixture();
        let account = f.account();
        let [g0, g1, g2] = [
            f.guardians[0].clone(),
            f.guardians[1].clone(),
            f.guardians[2].clone(),
        ];

        f.manager.initiate_recovery(&g0, &account).unwrap();
        f.clock.advance(60);
        let first = f.manager.approve_recovery(&g1, &account).unwrap();
        assert!(!first.value.is_completed());
        assert!(f.manager.recovery_request(&account).unwrap().is_active);

        f.clock.advance(60);
        let second = f.manager.approve_recovery(&g2, &account).unwrap();
        assert!(second.value.is_completed());
        let names: Vec<_> = second.events.iter().map(|r| r.event.name()).collect();
        assert_eq!(names, vec!["RecoveryApproved", "RecoveryCompleted"]);

        let snapshot = f.manager.recovery_request(&account).unwrap();
        assert!(!snapshot.is_active);
        assert_eq!(snapshot.completed_at, Some(1_700_000_120));

        assert!(f.manager.verify_events().is_ok());
        assert_eq!(f.manager.stats().events, 5);
    }

    #[test]
    fn test_timeout_then_expire() {
        let mut f = fixture();
        let account = f.account();
        let g0 = f.guardians[0].clone();
        let g1 = f.guardians[1].clone();

        f.manager.initiate_recovery(&g0, &account).unwrap();
        f.clock.advance(RECOVERY_TIMEOUT_SECS + 1);

        let late = f.manager.approve_recovery(&g1, &account);
        assert!(matches!(
            late,
            Err(ProtocolError::Recovery(RecoveryError::RecoveryTimeout { .. }))
        ));
        assert_eq!(f.manager.recovery_request(&account).unwrap().approval_count, 0);

        f.manager.expire_recovery(&g1, &account).unwrap();
        assert!(f.manager.initiate_recovery(&g1, &account).is_ok());
        assert_eq!(f.manager.stats().active_recoveries, 1);
    }

    #[test]
    fn test_per_account_queries() {
        let mut f = fixture();
        let other = Principal::from_key_pair(&KeyPair::generate());
        f.manager
            .create_account(
                &other,
                KeyBlob::random(),
                vec![f.guardians[0].address().clone()],
                1,
            )
            .unwrap();

        assert_eq!(f.manager.guarded_by(f.guardians[0].address()).len(), 2);
        assert_eq!(f.manager.guarded_by(f.guardians[1].address()).len(), 1);
        assert!(f.manager.guarded_by(f.owner.address()).is_empty());

        f.manager
            .initiate_recovery(&f.guardians[1], &f.account())
            .unwrap();

        let names: Vec<_> = f
            .manager
            .account_events(&f.account(), 0)
            .iter()
            .map(|r| r.event.name())
            .collect();
        assert_eq!(names, vec!["WalletCreated", "RecoveryInitiated"]);
        assert_eq!(f.manager.account_events(&f.account(), 2).len(), 1);
        assert_eq!(f.manager.account_events(other.address(), 0).len(), 1);
    }

    #[test]
    fn test_owner_cannot_recover() {
        let mut f = fixture();
        let owner = f.owner.clone();
        let account = f.account();

        let result = f.manager.initiate_recovery(&owner, &account);
        assert!(matches!(
            result,
            Err(ProtocolError::Recovery(RecoveryError::NotGuardian(_)))
        ));
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut f = fixture();
        let owner = f.owner.clone();
        let account = f.account();
        f.manager.set_pattern(&owner, 5, ETHER, 3600);
        f.manager.check_transaction(&account, 1).unwrap();

        let json = serde_json::to_string(&f.manager).unwrap();
        let mut restored: AccountManager = serde_json::from_str(&json).unwrap();
        restored.set_clock(Arc::new(f.clock.clone()));

        assert_eq!(restored.stats(), f.manager.stats());
        assert_eq!(restored.recent_transfers(&account), 1);
        assert!(restored.verify_events().is_ok());
    }
}
