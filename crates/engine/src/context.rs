//! The workflow context — single source of truth for one run.
//!
//! The context is a pure state container: step definitions, edges,
//! globals, per-step execution records, results, and the two lifecycle
//! state machines. It never runs jobs and never makes scheduling
//! decisions; the scheduler is its only writer during execution (the
//! `&mut` receiver enforces the single-writer property the design
//! requires).
//!
//! Every mutation emits one snapshot, in mutation order, onto an
//! unbounded channel. A forwarder task owned by the façade drains the
//! channel into the configured tracker, so tracker I/O never blocks the
//! scheduler.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use jobs::func::FnJob;
use jobs::{Job, JobInputs};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use uuid::Uuid;

use crate::decider::Decider;
use crate::error::EngineError;
use crate::models::{
    ExecutionRecord, InputRef, InputSpec, RoutingCallback, StepDefinition, StepPerf, StepRouter,
    StepStatus, WorkflowPerf, WorkflowStatus,
};
use crate::perf;
use crate::retry::RetryPolicy;
use crate::snapshot::{
    ContextSnapshot, ExecutionSnapshot, RetrySnapshot, StepPerfSnapshot, StepSnapshot,
};

// ---------------------------------------------------------------------------
// Input resolution
// ---------------------------------------------------------------------------

/// Resolve an input spec against a result set and globals.
///
/// Literals pass through; dependency references look up
/// `results[source][key]`, yielding `null` when either level is absent.
/// Globals are merged in afterwards under keys that do not collide with
/// resolved inputs — declared inputs always win.
pub(crate) fn resolve_input_spec(
    spec: &InputSpec,
    results: &IndexMap<String, Value>,
    globals: &IndexMap<String, Value>,
) -> JobInputs {
    let mut resolved = JobInputs::new();
    for (name, input_ref) in spec {
        let value = match input_ref {
            InputRef::Literal(value) => value.clone(),
            InputRef::Dependency {
                source_step,
                output_key,
            } => results
                .get(source_step)
                .and_then(|output| output.get(output_key))
                .cloned()
                .unwrap_or(Value::Null),
        };
        resolved.insert(name.clone(), value);
    }
    for (name, value) in globals {
        if !resolved.contains_key(name) {
            resolved.insert(name.clone(), value.clone());
        }
    }
    resolved
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// State of one workflow run.
pub struct Context {
    workflow_id: Uuid,
    name: String,
    description: Option<String>,
    status: WorkflowStatus,
    /// Cleared when a stop-on-fail abort lands; the scheduler checks
    /// this before starting each step and at layer boundaries.
    running: bool,
    globals: IndexMap<String, Value>,
    steps: IndexMap<String, StepDefinition>,
    results: IndexMap<String, Value>,
    executions: IndexMap<String, ExecutionRecord>,
    started_at: Option<f64>,
    ended_at: Option<f64>,
    performance: WorkflowPerf,
    emitter: Option<UnboundedSender<Value>>,
}

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            workflow_id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            status: WorkflowStatus::Pending,
            running: false,
            globals: IndexMap::new(),
            steps: IndexMap::new(),
            results: IndexMap::new(),
            executions: IndexMap::new(),
            started_at: None,
            ended_at: None,
            performance: WorkflowPerf::default(),
            emitter: None,
        }
    }

    // -- accessors ----------------------------------------------------------

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn steps(&self) -> &IndexMap<String, StepDefinition> {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.get(id)
    }

    pub fn has_step(&self, id: &str) -> bool {
        self.steps.contains_key(id)
    }

    pub fn results(&self) -> &IndexMap<String, Value> {
        &self.results
    }

    pub fn globals(&self) -> &IndexMap<String, Value> {
        &self.globals
    }

    pub fn record(&self, id: &str) -> Option<&ExecutionRecord> {
        self.executions.get(id)
    }

    /// Move the results map out; the context is discarded afterwards.
    pub(crate) fn take_results(&mut self) -> IndexMap<String, Value> {
        std::mem::take(&mut self.results)
    }

    // -- construction -------------------------------------------------------

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
        self.emit();
    }

    /// Register the step under its id.
    ///
    /// # Errors
    /// [`EngineError::DuplicateStepId`] when the id is already taken.
    pub fn add_step(&mut self, step: StepDefinition) -> Result<(), EngineError> {
        if self.steps.contains_key(&step.id) {
            return Err(EngineError::DuplicateStepId(step.id));
        }
        self.executions
            .insert(step.id.clone(), ExecutionRecord::pending());
        self.steps.insert(step.id.clone(), step);
        self.emit();
        Ok(())
    }

    /// Add a precedence edge `from → to`.
    ///
    /// `from` must exist; an unknown `to` is created as a no-op
    /// placeholder step so graphs can be declared edges-first.
    ///
    /// # Errors
    /// [`EngineError::UnknownStep`] when `from` doesn't exist.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<(), EngineError> {
        if !self.steps.contains_key(from) {
            return Err(EngineError::UnknownStep(from.to_string()));
        }
        if !self.steps.contains_key(to) {
            let placeholder: Arc<dyn Job> = Arc::new(FnJob::new(to, |_inputs, _ctx| Ok(json!({}))));
            self.add_step(StepDefinition::new(to, placeholder, InputSpec::new()))?;
        }
        let step = self.steps.get_mut(from).expect("checked above");
        if !step.connections.iter().any(|t| t == to) {
            step.connections.push(to.to_string());
        }
        self.emit();
        Ok(())
    }

    /// Drop every outgoing edge of `id` — used by dynamic routing before
    /// installing the routed edges.
    pub fn clear_outgoing_edges(&mut self, id: &str) -> Result<(), EngineError> {
        let step = self
            .steps
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownStep(id.to_string()))?;
        step.connections.clear();
        self.emit();
        Ok(())
    }

    pub fn set_retry(&mut self, id: &str, policy: RetryPolicy) -> Result<(), EngineError> {
        self.with_step_mut(id, |step| step.retry = Some(policy))
    }

    pub fn set_timeout(&mut self, id: &str, timeout: Duration) -> Result<(), EngineError> {
        self.with_step_mut(id, |step| step.timeout = Some(timeout))
    }

    pub fn set_decider(&mut self, id: &str, decider: Decider) -> Result<(), EngineError> {
        self.with_step_mut(id, |step| step.router = Some(StepRouter::Decider(decider)))
    }

    pub fn set_router(&mut self, id: &str, callback: RoutingCallback) -> Result<(), EngineError> {
        self.with_step_mut(id, |step| step.router = Some(StepRouter::Callback(callback)))
    }

    pub fn set_stop_on_fail(&mut self, id: &str, stop_on_fail: bool) -> Result<(), EngineError> {
        self.with_step_mut(id, |step| step.stop_on_fail = stop_on_fail)
    }

    fn with_step_mut(
        &mut self,
        id: &str,
        apply: impl FnOnce(&mut StepDefinition),
    ) -> Result<(), EngineError> {
        let step = self
            .steps
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownStep(id.to_string()))?;
        apply(step);
        self.emit();
        Ok(())
    }

    /// Replace the globals wholesale.
    pub fn set_globals(&mut self, globals: IndexMap<String, Value>) {
        self.globals = globals;
        self.emit();
    }

    // -- input resolution ---------------------------------------------------

    /// Resolve a step's inputs against the current results and globals.
    ///
    /// # Errors
    /// [`EngineError::UnknownStep`] when `id` doesn't exist.
    pub fn resolve_inputs(&self, id: &str) -> Result<JobInputs, EngineError> {
        let step = self
            .steps
            .get(id)
            .ok_or_else(|| EngineError::UnknownStep(id.to_string()))?;
        Ok(resolve_input_spec(&step.inputs, &self.results, &self.globals))
    }

    // -- lifecycle markers --------------------------------------------------

    pub fn mark_workflow_started(&mut self) {
        self.status = WorkflowStatus::Running;
        self.running = true;
        self.started_at = Some(perf::now_unix());
        let memory = perf::current_memory();
        self.performance.start_memory = memory;
        self.performance.peak_memory = memory;
        self.emit();
    }

    /// Terminal transition for the whole run. Clears the running flag so
    /// the scheduler stops picking up further work.
    pub fn mark_workflow_ended(&mut self, status: WorkflowStatus) {
        self.running = false;
        self.status = status;
        let ended = perf::now_unix();
        self.ended_at = Some(ended);
        self.performance.execution_time = self
            .started_at
            .map(|started| (ended - started).max(0.0))
            .unwrap_or(0.0);
        self.observe_memory(perf::current_memory());
        self.performance.memory_used = self
            .performance
            .peak_memory
            .saturating_sub(self.performance.start_memory);
        self.emit();
    }

    pub fn mark_step_started(&mut self, id: &str, inputs: &JobInputs) -> Result<(), EngineError> {
        let record = self.record_mut(id)?;
        if record.status.is_terminal() {
            warn!(step_id = id, status = %record.status, "refusing to restart a terminal step");
            return Ok(());
        }
        record.status = StepStatus::Running;
        record.started_at = Some(perf::now_unix());
        record.inputs = json!(inputs);
        self.emit();
        Ok(())
    }

    pub fn mark_step_completed(
        &mut self,
        id: &str,
        output: Value,
        logs: Vec<String>,
        step_perf: StepPerf,
    ) -> Result<(), EngineError> {
        let record = self.record_mut(id)?;
        if record.status.is_terminal() {
            warn!(step_id = id, status = %record.status, "refusing to complete a terminal step");
            return Ok(());
        }
        let ended = perf::now_unix();
        record.status = StepStatus::Success;
        record.ended_at = Some(ended);
        record.execution_time = record
            .started_at
            .map(|started| (ended - started).max(0.0))
            .unwrap_or(0.0);
        record.attempts = step_perf.attempts;
        record.memory_used = step_perf.memory_used;
        record.peak_memory = step_perf.peak_memory;
        // Append: pre-run warnings (cycle membership) stay in the log.
        record.logs.extend(logs);
        record.output = Some(output.clone());
        self.results.insert(id.to_string(), output);
        self.observe_memory(step_perf.peak_memory);
        self.emit();
        Ok(())
    }

    pub fn mark_step_failed(
        &mut self,
        id: &str,
        mut errors: Vec<String>,
        logs: Vec<String>,
        step_perf: StepPerf,
    ) -> Result<(), EngineError> {
        let record = self.record_mut(id)?;
        if record.status.is_terminal() {
            warn!(step_id = id, status = %record.status, "refusing to fail a terminal step");
            return Ok(());
        }
        // A failed record always carries at least one error message.
        if errors.is_empty() {
            errors.push("unknown error".to_string());
        }
        let ended = perf::now_unix();
        record.status = StepStatus::Fail;
        record.ended_at = Some(ended);
        record.execution_time = record
            .started_at
            .map(|started| (ended - started).max(0.0))
            .unwrap_or(0.0);
        record.attempts = step_perf.attempts;
        record.memory_used = step_perf.memory_used;
        record.peak_memory = step_perf.peak_memory;
        record.errors = errors;
        record.logs.extend(logs);
        self.observe_memory(step_perf.peak_memory);
        self.emit();
        Ok(())
    }

    pub fn mark_step_skipped(
        &mut self,
        id: &str,
        reason: impl Into<String>,
    ) -> Result<(), EngineError> {
        let record = self.record_mut(id)?;
        if record.status.is_terminal() {
            warn!(step_id = id, status = %record.status, "refusing to skip a terminal step");
            return Ok(());
        }
        record.status = StepStatus::Skipped;
        record.skip_reason = Some(reason.into());
        self.emit();
        Ok(())
    }

    /// Append a warning line to a step's log (cycle membership, dropped
    /// route targets) without touching its status.
    pub fn record_warning(&mut self, id: &str, line: impl Into<String>) {
        if let Some(record) = self.executions.get_mut(id) {
            record.logs.push(line.into());
            self.emit();
        }
    }

    fn record_mut(&mut self, id: &str) -> Result<&mut ExecutionRecord, EngineError> {
        self.executions
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownStep(id.to_string()))
    }

    fn observe_memory(&mut self, sample: u64) {
        if sample > self.performance.peak_memory {
            self.performance.peak_memory = sample;
        }
    }

    // -- snapshots ----------------------------------------------------------

    /// Serializable deep copy of the full state. Pure: two calls with no
    /// interleaved mutation produce identical snapshots.
    pub fn snapshot(&self) -> ContextSnapshot {
        let steps = self
            .steps
            .values()
            .map(|step| StepSnapshot {
                id: step.id.clone(),
                name: step.job.name(),
                description: step.job.description(),
                inputs: json!(step.inputs),
                retry: step.retry.map(|policy| RetrySnapshot {
                    max_attempts: policy.max_attempts,
                    base_delay: policy.base_delay,
                    multiplier: policy.multiplier,
                }),
                timeout: step.timeout.map(|t| t.as_secs_f64()),
                stop_on_fail: step.stop_on_fail,
                connections: step.connections.clone(),
            })
            .collect();

        let executed_jobs = self
            .executions
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    ExecutionSnapshot {
                        status: record.status,
                        attempts: record.attempts,
                        started_at: record.started_at,
                        completed_at: record.ended_at,
                        inputs: record.inputs.clone(),
                        outputs: record.output.clone(),
                        logs: record.logs.clone(),
                        errors: record.errors.clone(),
                        skip_reason: record.skip_reason.clone(),
                        performance: StepPerfSnapshot {
                            execution_time: record.execution_time,
                            memory_used: record.memory_used,
                            peak_memory: record.peak_memory,
                        },
                    },
                )
            })
            .collect();

        ContextSnapshot {
            workflow_id: self.workflow_id.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.ended_at,
            globals: self.globals.clone(),
            performance: self.performance,
            steps,
            results: self.results.clone(),
            executed_jobs,
        }
    }

    pub(crate) fn attach_emitter(&mut self, emitter: UnboundedSender<Value>) {
        self.emitter = Some(emitter);
    }

    /// Drop the emitter so the forwarder task sees end-of-stream.
    pub(crate) fn detach_emitter(&mut self) {
        self.emitter = None;
    }

    /// Ship one snapshot per mutation. Send failures mean the forwarder
    /// is gone; nothing to do about it here.
    fn emit(&self) {
        if let Some(emitter) = &self.emitter {
            match serde_json::to_value(self.snapshot()) {
                Ok(payload) => {
                    let _ = emitter.send(payload);
                }
                Err(e) => warn!(workflow_id = %self.workflow_id, "snapshot serialization failed: {e}"),
            }
        }
    }
}
