//! Redis-backed tracker: key/value mirror plus pub-sub fan-out.
//!
//! Every snapshot is written to `workflow:realtime:{workflow_id}` and
//! published on `workflow:updates:{workflow_id}`, so dashboards can
//! either poll the key or subscribe to the channel. When a snapshot
//! carries a terminal status the key gets a TTL so finished workflows
//! age out of Redis on their own.

use async_trait::async_trait;
use ::redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::{Tracker, TrackerError};

/// Key TTL applied once a workflow reaches a terminal status.
pub const DEFAULT_COMPLETED_TTL_SECS: u64 = 3600;

const KEY_PREFIX: &str = "workflow:realtime";
const CHANNEL_PREFIX: &str = "workflow:updates";

/// Mirrors snapshots into Redis.
///
/// Uses the async `ConnectionManager` for pooling and automatic
/// reconnection. Every Redis failure is logged and swallowed — the
/// workflow never notices a monitoring outage.
pub struct RedisTracker {
    manager: ConnectionManager,
    completed_ttl_secs: u64,
}

impl RedisTracker {
    /// Connect to Redis at `url` (e.g. `redis://localhost:6379`).
    ///
    /// # Errors
    /// [`TrackerError::Redis`] if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, TrackerError> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager,
            completed_ttl_secs: DEFAULT_COMPLETED_TTL_SECS,
        })
    }

    /// Override the TTL applied to terminal snapshots.
    pub fn with_completed_ttl(mut self, secs: u64) -> Self {
        self.completed_ttl_secs = secs;
        self
    }

    fn is_terminal(payload: &Value) -> bool {
        matches!(
            payload.get("status").and_then(Value::as_str),
            Some("success") | Some("fail")
        )
    }
}

#[async_trait]
impl Tracker for RedisTracker {
    async fn track(&self, workflow_id: Uuid, payload: &Value) {
        let key = format!("{KEY_PREFIX}:{workflow_id}");
        let channel = format!("{CHANNEL_PREFIX}:{workflow_id}");

        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(workflow_id = %workflow_id, "snapshot not serializable: {e}");
                return;
            }
        };

        let mut conn = self.manager.clone();

        if let Err(e) = conn.set::<_, _, ()>(&key, &json).await {
            warn!(workflow_id = %workflow_id, "redis SET failed: {e}");
        }

        if let Err(e) = conn.publish::<_, _, ()>(&channel, &json).await {
            warn!(workflow_id = %workflow_id, "redis PUBLISH failed: {e}");
        }

        if Self::is_terminal(payload) {
            if let Err(e) = conn.expire::<_, ()>(&key, self.completed_ttl_secs as i64).await {
                warn!(workflow_id = %workflow_id, "redis EXPIRE failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_detection() {
        assert!(RedisTracker::is_terminal(&json!({ "status": "success" })));
        assert!(RedisTracker::is_terminal(&json!({ "status": "fail" })));
        assert!(!RedisTracker::is_terminal(&json!({ "status": "running" })));
        assert!(!RedisTracker::is_terminal(&json!({ "status": "pending" })));
        assert!(!RedisTracker::is_terminal(&json!({})));
    }
}
