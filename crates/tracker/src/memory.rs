//! `MemoryTracker` — records snapshots in memory for test assertions.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::Tracker;

/// Keeps every tracked payload, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct MemoryTracker {
    records: Arc<Mutex<Vec<(Uuid, Value)>>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// All payloads received so far, in order.
    pub fn payloads(&self) -> Vec<Value> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// The most recent payload, if any.
    pub fn last(&self) -> Option<Value> {
        self.records.lock().unwrap().last().map(|(_, p)| p.clone())
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Tracker for MemoryTracker {
    async fn track(&self, workflow_id: Uuid, payload: &Value) {
        self.records.lock().unwrap().push((workflow_id, payload.clone()));
    }
}
