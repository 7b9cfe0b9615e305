//! Behavioral transfer patterns

use crate::clock::Timestamp;
use crate::identity::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Expected transfer behavior of one account
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPattern {
    /// Max transfers allowed inside `time_window`
    pub frequency: u32,
    /// Max value of a single transfer
    pub max_amount: u128,
    /// Rolling window length in seconds
    pub time_window: u64,
}

impl TransactionPattern {
    pub fn new(frequency: u32, max_amount: u128, time_window: u64) -> Self {
        Self {
            frequency,
            max_amount,
            time_window,
        }
    }

    /// Oldest timestamp still inside the window ending at `now`
    pub fn window_start(&self, now: Timestamp) -> Timestamp {
        now.saturating_sub(self.time_window)
    }

    pub fn exceeds_amount(&self, amount: u128) -> bool {
        amount > self.max_amount
    }
}

/// Patterns keyed by account
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PatternStore {
    patterns: HashMap<Address, TransactionPattern>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pattern, returning the one it replaced
    pub fn set(
        &mut self,
        account: Address,
        pattern: TransactionPattern,
    ) -> Option<TransactionPattern> {
        self.patterns.insert(account, pattern)
    }

    pub fn get(&self, account: &Address) -> Option<&TransactionPattern> {
        self.patterns.get(account)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
