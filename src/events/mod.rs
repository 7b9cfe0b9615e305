//! Protocol events and the append-only event ledger

pub mod event;
pub mod ledger;

pub use event::{Outcome, ProtocolEvent};
pub use ledger::{EventLog, EventLogError, EventRecord};
