//! Transfer anomaly monitoring
//!
//! Each account sets its own [`TransactionPattern`]; the
//! [`AnomalyMonitor`] then allows or denies proposed transfers against it.
//! A denial is a decision, not an error: the call succeeds and emits
//! `SuspiciousActivity`.

pub mod anomaly;
pub mod pattern;

pub use anomaly::{
    AnomalyMonitor, AnomalyReason, MonitorError, TransferDecision, TransferHistory,
    DEFAULT_HISTORY_CAPACITY,
};
pub use pattern::{PatternStore, TransactionPattern};
