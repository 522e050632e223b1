//! `tracker` crate — observer sinks for workflow state snapshots.
//!
//! The engine emits one snapshot per context mutation; a [`Tracker`]
//! mirrors those snapshots somewhere useful for real-time monitoring.
//! Tracker failures must never affect workflow execution, so `track`
//! is infallible by contract: implementations catch and log their own
//! errors.

pub mod error;
pub mod memory;
pub mod redis;

pub use error::TrackerError;
pub use memory::MemoryTracker;
pub use self::redis::RedisTracker;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Observer sink for context snapshots.
///
/// `payload` is the serialized snapshot JSON (see the engine's snapshot
/// wire format). Implementations must swallow their own failures —
/// a tracker that raises would let a monitoring outage kill a workflow.
#[async_trait]
pub trait Tracker: Send + Sync {
    async fn track(&self, workflow_id: Uuid, payload: &Value);
}

/// Discards every snapshot. The default when no tracker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

#[async_trait]
impl Tracker for NoopTracker {
    async fn track(&self, _workflow_id: Uuid, _payload: &Value) {}
}
