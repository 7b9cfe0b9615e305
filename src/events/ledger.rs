//! Append-only event ledger
//!
//! Records are numbered from zero and hash-chained: each record commits to
//! its predecessor's hash, so any edit to a persisted log is detectable
//! with [`EventLog::verify`].

use crate::clock::Timestamp;
use crate::crypto::{hash_parts, zero_hash};
use crate::events::event::ProtocolEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ledger integrity errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventLogError {
    #[error("Broken hash chain at record {seq}")]
    BrokenChain { seq: u64 },
    #[error("Out of order record: expected {expected}, found {found}")]
    OutOfOrder { expected: u64, found: u64 },
}

/// One recorded event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp: Timestamp,
    pub event: ProtocolEvent,
    pub prev_hash: String,
    pub hash: String,
}

impl EventRecord {
    fn compute_hash(
        seq: u64,
        timestamp: Timestamp,
        event: &ProtocolEvent,
        prev_hash: &str,
    ) -> String {
        let payload = serde_json::to_vec(event).unwrap_or_default();
        hash_parts(&[
            prev_hash.as_bytes(),
            &seq.to_be_bytes(),
            &timestamp.to_be_bytes(),
            &payload,
        ])
    }

    /// Check that `hash` matches the record's content
    pub fn is_intact(&self) -> bool {
        self.hash == Self::compute_hash(self.seq, self.timestamp, &self.event, &self.prev_hash)
    }
}

/// Ordered, append-only list of event records
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return the stored record
    pub fn append(&mut self, timestamp: Timestamp, event: ProtocolEvent) -> &EventRecord {
        let seq = self.records.len() as u64;
        let prev_hash = self.latest_hash();
        let hash = EventRecord::compute_hash(seq, timestamp, &event, &prev_hash);

        self.records.push(EventRecord {
            seq,
            timestamp,
            event,
            prev_hash,
            hash,
        });
        &self.records[self.records.len() - 1]
    }

    /// Records with `seq >= since`
    pub fn since(&self, since: u64) -> &[EventRecord] {
        let start = usize::try_from(since)
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        &self.records[start..]
    }

    /// Records concerning one account, oldest first
    pub fn for_account(&self, account: &crate::identity::Address) -> Vec<&EventRecord> {
        self.records
            .iter()
            .filter(|r| r.event.account() == account)
            .collect()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Hash of the newest record, or the zero hash for an empty log
    pub fn latest_hash(&self) -> String {
        self.records
            .last()
            .map(|r| r.hash.clone())
            .unwrap_or_else(zero_hash)
    }

    /// Recompute the whole chain
    pub fn verify(&self) -> Result<(), EventLogError> {
        let mut prev = zero_hash();

        for (index, record) in self.records.iter().enumerate() {
            let expected = index as u64;
            if record.seq != expected {
                return Err(EventLogError::OutOfOrder {
                    expected,
                    found: record.seq,
                });
            }
            if record.prev_hash != prev || !record.is_intact() {
                return Err(EventLogError::BrokenChain { seq: record.seq });
            }
            prev = record.hash.clone();
        }

        Ok(())
    }
}
