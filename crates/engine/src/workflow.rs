//! Workflow façade — the fluent builder users actually touch.
//!
//! Builds the [`Context`], wires the tracker/runner/summary callback,
//! and owns `execute`: run the scheduler, flush the snapshot stream,
//! hand the final snapshot to the summary callback, return the results
//! map.
//!
//! Builder methods are infallible by signature so chains stay fluent;
//! the first construction error (duplicate step id, unknown step, …)
//! is remembered and surfaced by `execute`.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use jobs::Job;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;
use tracker::{NoopTracker, Tracker};
use uuid::Uuid;

use crate::context::Context;
use crate::dag::{self, LayerPlan};
use crate::decider::{CompareOp, Condition, Decider};
use crate::error::EngineError;
use crate::models::{InputSpec, RouteDecision, StepDefinition};
use crate::retry::RetryPolicy;
use crate::runner::{InlineRunner, Runner};
use crate::scheduler::Scheduler;
use crate::snapshot::ContextSnapshot;

/// Receives the final snapshot when `execute` finishes, whatever the
/// workflow status.
pub type SummaryCallback = Box<dyn FnOnce(&ContextSnapshot) + Send>;

/// One-shot workflow: declare the graph fluently, then `execute`.
pub struct Workflow {
    ctx: Context,
    tracker: Arc<dyn Tracker>,
    runner: Arc<dyn Runner>,
    max_parallelism: Option<usize>,
    summary: Option<SummaryCallback>,
    /// Deciders accumulated through `route`/`otherwise`, installed at
    /// execute time. A route chain overrides any decider installed
    /// earlier on the same step.
    staged_routes: IndexMap<String, Decider>,
    /// Target of the `with_*` modifiers: the most recently added step.
    last_step: Option<String>,
    build_error: Option<EngineError>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            ctx: Context::new(name),
            tracker: Arc::new(NoopTracker),
            runner: Arc::new(InlineRunner::new()),
            max_parallelism: None,
            summary: None,
            staged_routes: IndexMap::new(),
            last_step: None,
            build_error: None,
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        self.ctx.workflow_id()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.ctx.set_description(description);
        self
    }

    // -- graph construction -------------------------------------------------

    /// Add a step with no declared inputs.
    pub fn add_step(self, id: impl Into<String>, job: Arc<dyn Job>) -> Self {
        self.add_step_with_inputs(id, job, InputSpec::new())
    }

    /// Add a step with an ordered input spec.
    pub fn add_step_with_inputs(
        mut self,
        id: impl Into<String>,
        job: Arc<dyn Job>,
        inputs: InputSpec,
    ) -> Self {
        let id = id.into();
        let result = self.ctx.add_step(StepDefinition::new(id.clone(), job, inputs));
        match result {
            Ok(()) => self.last_step = Some(id),
            Err(e) => self.remember(e),
        }
        self
    }

    /// Add a precedence edge. An unknown `to` becomes a no-op
    /// placeholder step.
    pub fn connect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        let result = self.ctx.connect(&from.into(), &to.into());
        if let Err(e) = result {
            self.remember(e);
        }
        self
    }

    // -- modifiers for the most recently added step -------------------------

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        if let Some(id) = self.target_step() {
            let result = self.ctx.set_retry(&id, policy);
            self.check(result);
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Some(id) = self.target_step() {
            let result = self.ctx.set_timeout(&id, timeout);
            self.check(result);
        }
        self
    }

    /// Install a complete decider on the current step.
    pub fn with_decider(mut self, decider: Decider) -> Self {
        if let Some(id) = self.target_step() {
            let result = self.ctx.set_decider(&id, decider);
            self.check(result);
        }
        self
    }

    /// Install an imperative routing callback on the current step.
    pub fn with_router<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Value) -> RouteDecision + Send + Sync + 'static,
    {
        if let Some(id) = self.target_step() {
            let result = self.ctx.set_router(&id, Arc::new(callback));
            self.check(result);
        }
        self
    }

    /// Append a routing condition to the current step's decider:
    /// `output[key] <op> expected  =>  target`.
    pub fn route(
        mut self,
        key: impl Into<String>,
        op: CompareOp,
        expected: impl Into<Value>,
        target: impl Into<String>,
    ) -> Self {
        if let Some(id) = self.target_step() {
            self.staged_routes.entry(id).or_default().push(Condition {
                key: key.into(),
                op,
                expected: expected.into(),
                target: target.into(),
            });
        }
        self
    }

    /// Default target for the current step's route chain.
    pub fn otherwise(mut self, target: impl Into<String>) -> Self {
        if let Some(id) = self.target_step() {
            self.staged_routes.entry(id).or_default().set_default(target);
        }
        self
    }

    /// Whether a terminal failure of the current step aborts the whole
    /// workflow. Defaults to true.
    pub fn stop_on_fail(mut self, stop: bool) -> Self {
        if let Some(id) = self.target_step() {
            let result = self.ctx.set_stop_on_fail(&id, stop);
            self.check(result);
        }
        self
    }

    // -- run configuration --------------------------------------------------

    /// Replace the workflow globals.
    pub fn globals(mut self, globals: IndexMap<String, Value>) -> Self {
        self.ctx.set_globals(globals);
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = runner;
        self
    }

    /// Bound on concurrently running steps within one layer. Default:
    /// unbounded within the layer.
    pub fn max_parallelism(mut self, limit: usize) -> Self {
        self.max_parallelism = Some(limit.max(1));
        self
    }

    pub fn on_summary<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&ContextSnapshot) + Send + 'static,
    {
        self.summary = Some(Box::new(callback));
        self
    }

    // -- introspection ------------------------------------------------------

    /// The layer plan this graph would execute, without executing it.
    pub fn plan(&self) -> LayerPlan {
        dag::build_layers(self.ctx.steps())
    }

    // -- execution ----------------------------------------------------------

    /// Run the workflow to completion and return the results map
    /// (step id → output) of every successful step.
    ///
    /// # Errors
    /// Construction errors recorded during building, plus the fatal
    /// execution errors: [`EngineError::StepFailed`] (stop-on-fail
    /// abort), [`EngineError::UnknownRoute`] on a stopping step, and
    /// [`EngineError::DeadlockedGraph`]. Non-fatal step failures do not
    /// error — the failed steps are simply absent from the results map.
    pub async fn execute(mut self) -> Result<IndexMap<String, Value>, EngineError> {
        if let Some(error) = self.build_error.take() {
            return Err(error);
        }
        for (id, decider) in std::mem::take(&mut self.staged_routes) {
            self.ctx.set_decider(&id, decider)?;
        }

        // Snapshot stream: the context pushes one payload per mutation;
        // the forwarder drains them into the tracker sequentially, off
        // the scheduler's critical path.
        let (emit_tx, mut emit_rx) = mpsc::unbounded_channel::<Value>();
        self.ctx.attach_emitter(emit_tx);
        let tracker = self.tracker.clone();
        let workflow_id = self.ctx.workflow_id();
        let forwarder = tokio::spawn(async move {
            while let Some(payload) = emit_rx.recv().await {
                tracker.track(workflow_id, &payload).await;
            }
        });

        let scheduler = Scheduler::new(self.runner.clone(), self.max_parallelism);
        let outcome = scheduler.run(&mut self.ctx).await;

        // Close the stream and wait for the tail to flush.
        self.ctx.detach_emitter();
        if let Err(e) = forwarder.await {
            warn!(workflow_id = %workflow_id, "snapshot forwarder crashed: {e}");
        }

        // The summary callback sees the final snapshot regardless of
        // how the run ended.
        if let Some(callback) = self.summary.take() {
            let snapshot = self.ctx.snapshot();
            callback(&snapshot);
        }

        outcome?;
        Ok(self.ctx.take_results())
    }

    // -- internals ----------------------------------------------------------

    fn target_step(&mut self) -> Option<String> {
        if self.last_step.is_none() {
            self.remember(EngineError::UnknownStep(
                "(no step added yet)".to_string(),
            ));
        }
        self.last_step.clone()
    }

    fn check(&mut self, result: Result<(), EngineError>) {
        if let Err(e) = result {
            self.remember(e);
        }
    }

    /// Keep the first construction error; it surfaces at execute time.
    fn remember(&mut self, error: EngineError) {
        if self.build_error.is_none() {
            self.build_error = Some(error);
        }
    }
}
