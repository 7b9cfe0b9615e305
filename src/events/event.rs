//! Protocol events
//!
//! Events are produced by the component that handled a call and returned
//! alongside the call's result; nothing inside the protocol consumes them.

use crate::identity::Address;
use serde::{Deserialize, Serialize};

/// An externally observable signal emitted by a successful call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProtocolEvent {
    /// A protected account was created
    WalletCreated { account: Address },
    /// The owner added a guardian
    GuardianAdded { account: Address, guardian: Address },
    /// The owner changed the approval threshold
    ThresholdUpdated { account: Address, threshold: u32 },
    /// The anomaly gate denied a transfer
    SuspiciousActivity { account: Address, reason: String },
    /// A guardian opened a recovery request
    RecoveryInitiated { account: Address, guardian: Address },
    /// A guardian approved the active recovery request
    RecoveryApproved { account: Address, guardian: Address },
    /// Approvals reached the threshold
    RecoveryCompleted { account: Address },
    /// A timed-out request was closed
    RecoveryExpired { account: Address },
}

impl ProtocolEvent {
    /// The account the event concerns
    pub fn account(&self) -> &Address {
        match self {
            ProtocolEvent::WalletCreated { account }
            | ProtocolEvent::GuardianAdded { account, .. }
            | ProtocolEvent::ThresholdUpdated { account, .. }
            | ProtocolEvent::SuspiciousActivity { account, .. }
            | ProtocolEvent::RecoveryInitiated { account, .. }
            | ProtocolEvent::RecoveryApproved { account, .. }
            | ProtocolEvent::RecoveryCompleted { account }
            | ProtocolEvent::RecoveryExpired { account } => account,
        }
    }

    /// Event name as it appears in serialized records
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::WalletCreated { .. } => "WalletCreated",
            ProtocolEvent::GuardianAdded { .. } => "GuardianAdded",
            ProtocolEvent::ThresholdUpdated { .. } => "ThresholdUpdated",
            ProtocolEvent::SuspiciousActivity { .. } => "SuspiciousActivity",
            ProtocolEvent::RecoveryInitiated { .. } => "RecoveryInitiated",
            ProtocolEvent::RecoveryApproved { .. } => "RecoveryApproved",
            ProtocolEvent::RecoveryCompleted { .. } => "RecoveryCompleted",
            ProtocolEvent::RecoveryExpired { .. } => "RecoveryExpired",
        }
    }
}

/// The value of a call together with the events it emitted, in order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<ProtocolEvent>,
}

impl<T> Outcome<T> {
    /// An outcome with no events
    pub fn silent(value: T) -> Self {
        Self {
            value,
            events: Vec::new(),
        }
    }

    /// An outcome with a single event
    pub fn with_event(value: T, event: ProtocolEvent) -> Self {
        Self {
            value,
            events: vec![event],
        }
    }

    pub fn emit(&mut self, event: ProtocolEvent) {
        self.events.push(event);
    }
}
