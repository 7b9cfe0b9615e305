//! Time-bounded guardian recovery
//!
//! ```text
//! NoRequest -> Active -> Completed   (approvals reach the threshold)
//!                     -> Expired     (expire() after the deadline)
//! ```
//!
//! A timed-out request stays `Active` but accepts no approvals until a
//! guardian expires it.

pub mod coordinator;
pub mod request;

pub use coordinator::RecoveryCoordinator;
pub use request::{
    ApprovalOutcome, RecoveryError, RecoveryRequest, RecoverySnapshot, RecoveryStatus,
    RECOVERY_TIMEOUT_SECS,
};
