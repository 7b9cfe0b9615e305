//! Protocol façade
//!
//! [`AccountManager`] ties guardian management, the anomaly monitor and
//! recovery together behind one sequential API and keeps the event ledger.

pub mod config;
pub mod manager;

pub use config::ProtocolConfig;
pub use manager::{AccountManager, ManagerStats, ProtocolError, ProtocolResult, Receipt};
