//! Core domain models for the workflow engine.
//!
//! These types are the in-memory source of truth for what a workflow
//! looks like: step definitions with their input wiring, execution
//! records, and the status enums of both state machines.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use jobs::Job;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decider::Decider;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Input references
// ---------------------------------------------------------------------------

/// One entry of a step's input spec: either a literal value or a
/// reference to another step's output key.
///
/// The untagged representation lets workflow JSON write a dependency as
/// `{"from": "fetch", "key": "items"}` and anything else as a literal.
/// A literal object that happens to carry exactly `from` + `key` string
/// fields would parse as a dependency; wrap such payloads one level
/// deeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputRef {
    Dependency {
        #[serde(rename = "from")]
        source_step: String,
        #[serde(rename = "key")]
        output_key: String,
    },
    Literal(Value),
}

impl InputRef {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn dep(source_step: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self::Dependency {
            source_step: source_step.into(),
            output_key: output_key.into(),
        }
    }
}

/// Ordered mapping of parameter name → reference. Iteration order is
/// declaration order and is preserved all the way into resolved inputs.
pub type InputSpec = IndexMap<String, InputRef>;

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// What a routing callback may answer after a step succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Keep the static edges.
    Stay,
    /// Replace outgoing edges with a single edge to this step.
    To(String),
    /// Replace outgoing edges with edges to each of these steps.
    Fan(Vec<String>),
}

/// Imperative routing callback: output map in, decision out.
pub type RoutingCallback = Arc<dyn Fn(&Value) -> RouteDecision + Send + Sync>;

/// Conditional routing attached to a step — declarative or imperative.
#[derive(Clone)]
pub enum StepRouter {
    Decider(Decider),
    Callback(RoutingCallback),
}

impl fmt::Debug for StepRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decider(d) => f.debug_tuple("Decider").field(d).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

/// A single step in the workflow graph: a job plus its wiring and
/// execution policy.
#[derive(Clone)]
pub struct StepDefinition {
    /// Unique identifier within this workflow.
    pub id: String,
    /// The job executed when this step runs.
    pub job: Arc<dyn Job>,
    /// Ordered input wiring.
    pub inputs: InputSpec,
    /// Retry policy; `None` means the single-attempt default.
    pub retry: Option<RetryPolicy>,
    /// Per-attempt timeout; `None` means unbounded.
    pub timeout: Option<Duration>,
    /// When true (the default), terminal failure of this step aborts
    /// the whole workflow.
    pub stop_on_fail: bool,
    /// Outgoing edge targets, insertion-ordered and deduplicated.
    pub connections: Vec<String>,
    /// Optional conditional router consulted after a success.
    pub router: Option<StepRouter>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, job: Arc<dyn Job>, inputs: InputSpec) -> Self {
        Self {
            id: id.into(),
            job,
            inputs,
            retry: None,
            timeout: None,
            stop_on_fail: true,
            connections: Vec::new(),
            router: None,
        }
    }

    /// Step IDs this step's input spec depends on, deduplicated in
    /// declaration order. These are implicit parents in the graph.
    pub fn implicit_parents(&self) -> Vec<&str> {
        let mut parents: Vec<&str> = Vec::new();
        for input_ref in self.inputs.values() {
            if let InputRef::Dependency { source_step, .. } = input_ref {
                if !parents.contains(&source_step.as_str()) {
                    parents.push(source_step);
                }
            }
        }
        parents
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("job", &self.job.name())
            .field("inputs", &self.inputs)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("stop_on_fail", &self.stop_on_fail)
            .field("connections", &self.connections)
            .field("router", &self.router)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Per-step state machine:
/// `Pending → Running → Success | Fail`, or `Pending → Skipped`.
/// Terminal states are never re-entered within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Fail,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Workflow-level state machine: `Pending → Running → Success | Fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Success,
    Fail,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Fail => "fail",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Per-run metrics for one step, handed to the context by the scheduler
/// when the step reaches a terminal state.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepPerf {
    /// Attempts consumed (1-based count).
    pub attempts: u32,
    /// Memory delta across the run, bytes.
    pub memory_used: u64,
    /// Peak sampled memory across the run, bytes.
    pub peak_memory: u64,
}

/// Everything the context records about one step in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub status: StepStatus,
    pub attempts: u32,
    /// Unix float seconds; `None` until the step starts.
    pub started_at: Option<f64>,
    pub ended_at: Option<f64>,
    /// Wall-clock seconds between start and end.
    pub execution_time: f64,
    pub memory_used: u64,
    pub peak_memory: u64,
    /// The resolved inputs the step started with.
    pub inputs: Value,
    /// The output map; present only on success.
    pub output: Option<Value>,
    pub errors: Vec<String>,
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl ExecutionRecord {
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            attempts: 0,
            started_at: None,
            ended_at: None,
            execution_time: 0.0,
            memory_used: 0,
            peak_memory: 0,
            inputs: Value::Null,
            output: None,
            errors: Vec::new(),
            logs: Vec::new(),
            skip_reason: None,
        }
    }
}

/// Workflow-level performance accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPerf {
    pub start_memory: u64,
    pub peak_memory: u64,
    pub memory_used: u64,
    pub execution_time: f64,
}
