//! Job payload — the serialized form a job takes when crossing a
//! process boundary.
//!
//! The contract is symmetric: `job.to_payload()` followed by
//! `registry.instantiate(payload)` is the identity on `{class, id}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serialized job: a registry class key, the job's own id, and optional
/// class-specific data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobPayload {
    /// Registry key identifying the concrete job type.
    pub class: String,
    /// Job instance id.
    pub id: String,
    /// Class-specific configuration; `None` when the job is stateless.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JobPayload {
    pub fn new(class: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_round_trips_through_json() {
        let payload = JobPayload::new("mock", "fetch-1").with_data(json!({ "value": 7 }));
        let encoded = serde_json::to_string(&payload).unwrap();
        let decoded: JobPayload = serde_json::from_str(&encoded).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn data_field_is_omitted_when_absent() {
        let payload = JobPayload::new("mock", "solo");
        let encoded = serde_json::to_string(&payload).unwrap();
        assert!(!encoded.contains("data"));
    }
}
