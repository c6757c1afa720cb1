//! sync configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::RetryPolicy;
use crate::tree::MAX_DEPTH;
use crate::{LedgerError, Result, DEFAULT_TREE_DEPTH};

/// knobs for one pool deployment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// pool contract address
    pub contract: String,
    /// block the pool was deployed at; nothing is emitted before it
    pub genesis_block: u64,
    /// merkle tree depth the contract was deployed with
    pub depth: usize,
    /// block range per fallback request
    pub chunk_size: u64,
    /// block range per primary request (none = whole window at once)
    pub primary_chunk: Option<u64>,
    /// blocks behind head to stop at
    pub confirmations: u64,
    /// attempts per request before moving on
    pub retry_attempts: u32,
    /// first backoff step, doubled per attempt
    pub retry_base_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contract: String::new(),
            genesis_block: 0,
            depth: DEFAULT_TREE_DEPTH,
            chunk_size: 100,
            primary_chunk: None,
            confirmations: 0,
            retry_attempts: 3,
            retry_base_ms: 100,
        }
    }
}

impl SyncConfig {
    pub fn new(contract: &str, genesis_block: u64) -> Self {
        Self {
            contract: contract.to_string(),
            genesis_block,
            ..Self::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_ms),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(LedgerError::InvalidDepth(self.depth));
        }
        if self.chunk_size == 0 || self.primary_chunk == Some(0) {
            return Err(LedgerError::InvalidConfig("chunk size must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::new("0xpool", 1_000);
        assert_eq!(config.depth, 20);
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.genesis_block, 1_000);
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_policy().delay(1), Duration::from_millis(200));
    }

    #[test]
    fn test_validate() {
        let mut config = SyncConfig::default();
        config.depth = 40;
        assert!(matches!(config.validate(), Err(LedgerError::InvalidDepth(40))));

        let mut config = SyncConfig::default();
        config.chunk_size = 0;
        assert!(matches!(config.validate(), Err(LedgerError::InvalidConfig(_))));
    }
}
