//! Execution strategies — how a batch of jobs actually runs.
//!
//! The scheduler decides *what* runs and *when*; a [`Runner`] decides
//! *how*: directly in-process ([`InlineRunner`]) or in a spawned worker
//! process per job ([`SubprocessRunner`]). Either way the result is a
//! [`StepOutcome`] value — job failures are data here, never `Err`.

pub mod inline;
pub mod subprocess;

pub use inline::InlineRunner;
pub use subprocess::{SubprocessRunner, WorkerPayload};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use jobs::{Job, JobContext, JobInputs};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// JobInvocation
// ---------------------------------------------------------------------------

/// One attempt of one step, fully resolved and ready to execute.
///
/// Owns everything the job may see, so invocations can cross task (and
/// process) boundaries without touching the context.
#[derive(Clone)]
pub struct JobInvocation {
    pub step_id: String,
    pub job: Arc<dyn Job>,
    /// Inputs resolved for this attempt.
    pub inputs: JobInputs,
    pub globals: IndexMap<String, Value>,
    /// Results visible to this step (its transitive predecessors').
    pub results: IndexMap<String, Value>,
    pub workflow_id: Uuid,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl JobInvocation {
    /// The read-only view handed to `Job::run`.
    pub fn job_context(&self) -> JobContext {
        JobContext {
            workflow_id: self.workflow_id,
            step_id: self.step_id.clone(),
            globals: to_hash_map(&self.globals),
            results: to_hash_map(&self.results),
        }
    }
}

fn to_hash_map(map: &IndexMap<String, Value>) -> HashMap<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

// ---------------------------------------------------------------------------
// StepOutcome
// ---------------------------------------------------------------------------

/// Result of one attempt, as produced by a runner.
///
/// Also the worker wire format: the out-of-process worker prints exactly
/// this JSON document to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    /// Output map; present on success.
    pub result: Option<Value>,
    /// Headline error message; present on failure.
    pub error: Option<String>,
    /// Failure classification; present on failure.
    pub kind: Option<ErrorKind>,
    /// Log lines the job accumulated during this attempt.
    pub logs: Vec<String>,
    /// Individual job-reported error messages (may be empty even on
    /// failure when the job raised instead of reporting).
    pub errors: Vec<String>,
    pub memory_used: u64,
    pub peak_memory: u64,
}

impl StepOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            kind: None,
            logs: Vec::new(),
            errors: Vec::new(),
            memory_used: 0,
            peak_memory: 0,
        }
    }

    pub fn failure(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            kind: Some(kind),
            logs: Vec::new(),
            errors: Vec::new(),
            memory_used: 0,
            peak_memory: 0,
        }
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_memory(mut self, memory_used: u64, peak_memory: u64) -> Self {
        self.memory_used = memory_used;
        self.peak_memory = peak_memory;
        self
    }

    /// The messages that belong in the execution record: the job's own
    /// reported errors when present, the headline message otherwise.
    pub fn error_messages(&self) -> Vec<String> {
        if !self.errors.is_empty() {
            self.errors.clone()
        } else {
            self.error.iter().cloned().collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Strategy for executing job invocations.
///
/// Infallible by signature: every failure mode is normalized into a
/// failed [`StepOutcome`] so the scheduler reacts to tags, not
/// exceptions. The scheduler spawns one driver task per step in a
/// layer, so a whole batch of invocations starts before any is awaited
/// — subprocess runners get their start-all-then-await behaviour for
/// free.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run_job(&self, invocation: &JobInvocation) -> StepOutcome;
}
