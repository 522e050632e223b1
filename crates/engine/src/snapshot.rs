//! Serializable deep copy of a [`crate::context::Context`] — the wire
//! format consumed by trackers and the summary callback.
//!
//! The shape is stable: key/value dashboards and pub-sub subscribers
//! parse exactly this JSON. Field names here are the contract; renaming
//! one is a breaking change for every consumer.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{StepStatus, WorkflowPerf, WorkflowStatus};

/// Retry settings as reported in a step's snapshot entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySnapshot {
    pub max_attempts: u32,
    pub base_delay: f64,
    pub multiplier: f64,
}

/// Static definition of one step, as declared on the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub id: String,
    /// Job-declared name; falls back to the step id.
    pub name: String,
    pub description: String,
    /// The input spec as declared (dependencies keep their
    /// `{"from", "key"}` shape).
    pub inputs: Value,
    pub retry: Option<RetrySnapshot>,
    /// Per-attempt timeout in seconds.
    pub timeout: Option<f64>,
    pub stop_on_fail: bool,
    /// Outgoing edges at snapshot time (dynamic routing rewrites these).
    pub connections: Vec<String>,
}

/// Per-step runtime metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepPerfSnapshot {
    pub execution_time: f64,
    pub memory_used: u64,
    pub peak_memory: u64,
}

/// Execution state of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub status: StepStatus,
    pub attempts: u32,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub inputs: Value,
    pub outputs: Option<Value>,
    pub logs: Vec<String>,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub performance: StepPerfSnapshot,
}

/// The full workflow snapshot emitted after every context mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub workflow_id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub globals: IndexMap<String, Value>,
    pub performance: WorkflowPerf,
    pub steps: Vec<StepSnapshot>,
    pub results: IndexMap<String, Value>,
    pub executed_jobs: IndexMap<String, ExecutionSnapshot>,
}

impl ContextSnapshot {
    /// Execution entry for a step, if the snapshot knows it.
    pub fn execution(&self, step_id: &str) -> Option<&ExecutionSnapshot> {
        self.executed_jobs.get(step_id)
    }

    /// Step status shortcut used all over the acceptance tests.
    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.execution(step_id).map(|e| e.status)
    }
}
