//! Anomaly gate for outgoing transfers
//!
//! A transfer is checked against the account's pattern in a fixed order:
//! amount first, then frequency inside the rolling window. Only allowed
//! transfers are recorded in the history; a denial changes nothing except
//! emitting `SuspiciousActivity`.

use crate::clock::Timestamp;
use crate::events::{Outcome, ProtocolEvent};
use crate::identity::{Address, Principal};
use crate::monitor::pattern::{PatternStore, TransactionPattern};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use thiserror::Error;

/// Default number of transfer timestamps kept per account
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// Monitor errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Pattern not set for account: {0}")]
    PatternNotSet(Address),
}

/// Why a transfer was denied
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyReason {
    AmountExceedsMaximum,
    TooFrequent,
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyReason::AmountExceedsMaximum => f.write_str("Amount exceeds maximum"),
            AnomalyReason::TooFrequent => f.write_str("Too frequent transactions"),
        }
    }
}

/// Result of the anomaly gate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDecision {
    Allowed,
    Denied(AnomalyReason),
}

impl TransferDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, TransferDecision::Allowed)
    }

    pub fn reason(&self) -> Option<AnomalyReason> {
        match self {
            TransferDecision::Allowed => None,
            TransferDecision::Denied(reason) => Some(*reason),
        }
    }
}

/// Timestamps of allowed transfers, oldest first
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransferHistory {
    timestamps: VecDeque<Timestamp>,
}

impl TransferHistory {
    /// Transfers inside `[window_start, now]`
    pub fn count_within(&self, window_start: Timestamp, now: Timestamp) -> usize {
        self.timestamps
            .iter()
            .filter(|&&t| t >= window_start && t <= now)
            .count()
    }

    /// Drop entries older than `window_start`
    fn prune(&mut self, window_start: Timestamp) -> usize {
        let before = self.timestamps.len();
        while self
            .timestamps
            .front()
            .map(|&t| t < window_start)
            .unwrap_or(false)
        {
            self.timestamps.pop_front();
        }
        before - self.timestamps.len()
    }

    fn record(&mut self, now: Timestamp, capacity: usize) {
        self.timestamps.push_back(now);
        while self.timestamps.len() > capacity {
            self.timestamps.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

fn default_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

/// Per-account transfer gate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnomalyMonitor {
    patterns: PatternStore,
    #[serde(default)]
    history: HashMap<Address, TransferHistory>,
    #[serde(default = "default_capacity")]
    history_capacity: usize,
}

impl Default for AnomalyMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl AnomalyMonitor {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            patterns: PatternStore::new(),
            history: HashMap::new(),
            history_capacity: history_capacity.max(1),
        }
    }

    /// Set the caller's own pattern, replacing any previous one
    pub fn set_pattern(
        &mut self,
        caller: &Principal,
        frequency: u32,
        max_amount: u128,
        time_window: u64,
    ) -> Outcome<TransactionPattern> {
        let pattern = TransactionPattern::new(frequency, max_amount, time_window);
        self.patterns.set(caller.address().clone(), pattern);
        Outcome::silent(pattern)
    }

    pub fn pattern(&self, account: &Address) -> Option<&TransactionPattern> {
        self.patterns.get(account)
    }

    /// Gate a transfer of `amount` from `account` at time `now`
    ///
    /// # Errors
    /// `PatternNotSet` when the account never set a pattern; an unset
    /// pattern cannot bound risk, so the gate fails closed.
    pub fn check_transaction(
        &mut self,
        account: &Address,
        amount: u128,
        now: Timestamp,
    ) -> Result<Outcome<TransferDecision>, MonitorError> {
        let pattern = *self
            .patterns
            .get(account)
            .ok_or_else(|| MonitorError::PatternNotSet(account.clone()))?;

        if pattern.exceeds_amount(amount) {
            return Ok(Self::deny(account, AnomalyReason::AmountExceedsMaximum));
        }

        let window_start = pattern.window_start(now);
        let recent = self
            .history
            .get(account)
            .map(|h| h.count_within(window_start, now))
            .unwrap_or(0);

        if recent >= pattern.frequency as usize {
            return Ok(Self::deny(account, AnomalyReason::TooFrequent));
        }

        let capacity = self.history_capacity.max(pattern.frequency as usize);
        let history = self.history.entry(account.clone()).or_default();
        let pruned = history.prune(window_start);
        if pruned > 0 {
            log::debug!("Pruned {} stale transfer(s) for {}", pruned, account);
        }
        history.record(now, capacity);

        Ok(Outcome::silent(TransferDecision::Allowed))
    }

    /// Allowed transfers inside the account's current window
    pub fn recent_transfers(&self, account: &Address, now: Timestamp) -> usize {
        match (self.patterns.get(account), self.history.get(account)) {
            (Some(pattern), Some(history)) => {
                history.count_within(pattern.window_start(now), now)
            }
            _ => 0,
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    fn deny(account: &Address, reason: AnomalyReason) -> Outcome<TransferDecision> {
        Outcome::with_event(
            TransferDecision::Denied(reason),
            ProtocolEvent::SuspiciousActivity {
                account: account.clone(),
                reason: reason.to_string(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETHER: u128 = 1_000_000_000_000_000_000;

    fn user() -> Principal {
        Principal::trusted("user")
    }

    fn monitor_with_pattern(frequency: u32, max_amount: u128, window: u64) -> AnomalyMonitor {
        let mut monitor = AnomalyMonitor::default();
        monitor.set_pattern(&user(), frequency, max_amount, window);
        monitor
    }

    #[test]
    fn test_set_pattern_is_self_scoped() {
        let mut monitor = AnomalyMonitor::default();
        let outcome = monitor.set_pattern(&user(), 5, ETHER, 3600);

        assert!(outcome.events.is_empty());
        assert_eq!(
            monitor.pattern(&Address::from("user")),
            Some(&TransactionPattern::new(5, ETHER, 3600))
        );
    }

    #[test]
    fn test_allow_within_limits() {
        let mut monitor = monitor_with_pattern(5, ETHER, 3600);
        let account = Address::from("user");

        let outcome = monitor.check_transaction(&account, ETHER / 2, 1_000).unwrap();
        assert!(outcome.value.is_allowed());
        assert!(outcome.events.is_empty());
        assert_eq!(monitor.recent_transfers(&account, 1_000), 1);
    }

    #[test]
    fn test_amount_exceeds_maximum() {
        let mut monitor = monitor_with_pattern(5, ETHER, 3600);
        let account = Address::from("user");

        let outcome = monitor
            .check_transaction(&account, ETHER + ETHER / 2, 1_000)
            .unwrap();

        assert_eq!(
            outcome.value,
            TransferDecision::Denied(AnomalyReason::AmountExceedsMaximum)
        );
        assert_eq!(
            outcome.events,
            vec![ProtocolEvent::SuspiciousActivity {
                account: account.clone(),
                reason: "Amount exceeds maximum".to_string()
            }]
        );
        assert_eq!(monitor.recent_transfers(&account, 1_000), 0);
    }

    #[test]
    fn test_amount_checked_before_frequency() {
        let mut monitor = monitor_with_pattern(0, 10, 3600);
        let outcome = monitor
            .check_transaction(&Address::from("user"), 11, 1_000)
            .unwrap();
        assert_eq!(
            outcome.value.reason(),
            Some(AnomalyReason::AmountExceedsMaximum)
        );
    }

    #[test]
    fn test_too_frequent() {
        let mut monitor = monitor_with_pattern(1, ETHER, 3600);
        let account = Address::from("user");

        let first = monitor.check_transaction(&account, ETHER / 2, 1_000).unwrap();
        let second = monitor.check_transaction(&account, ETHER / 2, 1_001).unwrap();

        assert!(first.value.is_allowed());
        assert_eq!(
            second.value,
            TransferDecision::Denied(AnomalyReason::TooFrequent)
        );
        assert_eq!(
            second.events,
            vec![ProtocolEvent::SuspiciousActivity {
                account,
                reason: "Too frequent transactions".to_string()
            }]
        );
    }

    #[test]
    fn test_window_rolls_forward() {
        let mut monitor = monitor_with_pattern(2, 100, 60);
        let account = Address::from("user");

        assert!(monitor.check_transaction(&account, 1, 0).unwrap().value.is_allowed());
        assert!(monitor.check_transaction(&account, 1, 30).unwrap().value.is_allowed());
        assert!(!monitor.check_transaction(&account, 1, 60).unwrap().value.is_allowed());
        // the transfer at t=0 leaves the window at t=61
        assert!(monitor.check_transaction(&account, 1, 61).unwrap().value.is_allowed());
    }

    #[test]
    fn test_zero_frequency_denies_everything() {
        let mut monitor = monitor_with_pattern(0, 100, 60);
        let outcome = monitor
            .check_transaction(&Address::from("user"), 1, 0)
            .unwrap();
        assert_eq!(outcome.value.reason(), Some(AnomalyReason::TooFrequent));
    }

    #[test]
    fn test_pattern_not_set_fails_closed() {
        let mut monitor = AnomalyMonitor::default();
        let result = monitor.check_transaction(&Address::from("stranger"), 1, 0);
        assert_eq!(
            result.unwrap_err(),
            MonitorError::PatternNotSet(Address::from("stranger"))
        );
    }

    #[test]
    fn test_history_capacity_never_below_frequency() {
        let mut monitor = AnomalyMonitor::new(2);
        monitor.set_pattern(&user(), 4, 100, 3600);
        let account = Address::from("user");

        for t in 0..4 {
            assert!(monitor.check_transaction(&account, 1, t).unwrap().value.is_allowed());
        }
        assert!(!monitor.check_transaction(&account, 1, 5).unwrap().value.is_allowed());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            AnomalyReason::AmountExceedsMaximum.to_string(),
            "Amount exceeds maximum"
        );
        assert_eq!(
            AnomalyReason::TooFrequent.to_string(),
            "Too frequent transactions"
        );
    }
}
