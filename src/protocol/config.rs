//! Protocol configuration

use crate::monitor::DEFAULT_HISTORY_CAPACITY;
use crate::recovery::RECOVERY_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};

/// Tunables fixed when the protocol state is first created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Recovery approval window in seconds
    pub recovery_timeout_secs: u64,
    /// Transfer timestamps kept per account
    pub history_capacity: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            recovery_timeout_secs: RECOVERY_TIMEOUT_SECS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout_is_seven_days() {
        let config = ProtocolConfig::default();
        assert_eq!(config.recovery_timeout_secs, 604_800);
        assert_eq!(config.history_capacity, 256);
    }
}
