//! Finalized block record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A finalized block persisted by the block-finalized consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub network_id: String,
    pub number: u64,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

impl Block {
    /// Natural key used for at-least-once dedupe
    pub fn natural_key(&self) -> (String, String) {
        (self.network_id.clone(), self.hash.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_key() {
        let block = Block {
            network_id: "net-1".into(),
            number: 42,
            hash: "0xabc".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(block.natural_key(), ("net-1".into(), "0xabc".into()));
    }
}
