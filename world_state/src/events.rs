use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-serializable record produced by contract execution, addressed by
/// `(tx_hash, sequence)` where `sequence` starts at 1 per transaction.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub data: Value,
}

impl Event {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Event {
            topic: topic.into(),
            data,
        }
    }
}
