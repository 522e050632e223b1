//! Workflow scheduler — the execution loop.
//!
//! The scheduler is the single writer to the [`Context`] during a run:
//! 1. Computes the topological layer plan (cycle residue becomes
//!    trailing singleton layers with a recorded warning).
//! 2. Executes layer by layer: one ready step runs sequentially, many
//!    run concurrently through the configured [`Runner`], bounded by
//!    `max_parallelism`. Outcomes merge into the context in insertion
//!    order regardless of completion order.
//! 3. Wraps every step in its retry policy and optional per-attempt
//!    timeout; inputs are re-resolved fresh before each attempt.
//! 4. Applies dynamic routing after each success: a non-`Stay` decision
//!    replaces the step's outgoing edges, and successors that never get
//!    signalled along a cleared edge simply stay pending.
//!
//! A terminal failure of a `stop_on_fail` step aborts the run: the
//! remaining members of the aborting layer are still recorded, nothing
//! further is scheduled, and the workflow ends `Fail`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use jobs::Job;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::context::{resolve_input_spec, Context};
use crate::dag;
use crate::error::{EngineError, ErrorKind};
use crate::models::{
    InputSpec, RouteDecision, StepDefinition, StepPerf, StepRouter, StepStatus, WorkflowStatus,
};
use crate::retry::RetryPolicy;
use crate::runner::{JobInvocation, Runner, StepOutcome};

const CYCLE_WARNING: &str =
    "[Warn] step is part of a dependency cycle; execution order is not guaranteed";

// ---------------------------------------------------------------------------
// Per-step driver
// ---------------------------------------------------------------------------

/// Terminal result of driving one step through its retry loop.
enum RunOutcome {
    Success(Value),
    Failed { message: String },
}

struct StepRun {
    outcome: RunOutcome,
    attempts: u32,
    logs: Vec<String>,
    errors: Vec<String>,
    memory_used: u64,
    peak_memory: u64,
}

impl StepRun {
    fn from_driver_crash(message: String) -> Self {
        Self {
            outcome: RunOutcome::Failed {
                message: message.clone(),
            },
            attempts: 1,
            logs: Vec::new(),
            errors: vec![message],
            memory_used: 0,
            peak_memory: 0,
        }
    }
}

/// Everything one step needs to run to completion without touching the
/// context: the retry loop re-resolves inputs from an immutable view of
/// the results written by prior layers (co-members of the same layer
/// are deliberately invisible).
struct StepDriver {
    step_id: String,
    job: Arc<dyn Job>,
    spec: InputSpec,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    globals: IndexMap<String, Value>,
    results: IndexMap<String, Value>,
    workflow_id: Uuid,
    runner: Arc<dyn Runner>,
    semaphore: Arc<Semaphore>,
}

impl StepDriver {
    async fn drive(self) -> StepRun {
        // The semaphore only closes when the scheduler is torn down;
        // running unbounded then is the safer failure mode.
        let _permit = self.semaphore.clone().acquire_owned().await.ok();

        let mut logs: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut memory_used = 0u64;
        let mut peak_memory = 0u64;
        let max_attempts = self.retry.max_attempts;

        for attempt in 1..=max_attempts {
            let inputs = resolve_input_spec(&self.spec, &self.results, &self.globals);
            let invocation = JobInvocation {
                step_id: self.step_id.clone(),
                job: self.job.clone(),
                inputs,
                globals: self.globals.clone(),
                results: self.results.clone(),
                workflow_id: self.workflow_id,
                attempt,
            };

            let outcome = match self.timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.runner.run_job(&invocation)).await {
                        Ok(outcome) => outcome,
                        Err(_elapsed) => StepOutcome::failure(
                            ErrorKind::Timeout,
                            format!("attempt timed out after {:.3}s", limit.as_secs_f64()),
                        ),
                    }
                }
                None => self.runner.run_job(&invocation).await,
            };

            memory_used = memory_used.max(outcome.memory_used);
            peak_memory = peak_memory.max(outcome.peak_memory);
            logs.extend(outcome.logs.iter().cloned());

            if outcome.success {
                return StepRun {
                    outcome: RunOutcome::Success(outcome.result.unwrap_or_else(|| json!({}))),
                    attempts: attempt,
                    logs,
                    errors,
                    memory_used,
                    peak_memory,
                };
            }

            let message = outcome
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            errors.extend(outcome.error_messages());
            logs.push(format!("[Error] Attempt {attempt} failed: {message}"));

            if attempt < max_attempts {
                let delay = self.retry.delay(attempt);
                warn!(
                    step_id = self.step_id.as_str(),
                    attempt,
                    max_attempts,
                    "attempt failed, retrying in {:?}: {message}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        let message = errors
            .last()
            .cloned()
            .unwrap_or_else(|| "unknown error".to_string());
        StepRun {
            outcome: RunOutcome::Failed { message },
            attempts: max_attempts,
            logs,
            errors,
            memory_used,
            peak_memory,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// A prepared layer member: either skipped at validation time or armed
/// with a driver.
enum Slot {
    Skipped,
    Armed(StepDriver),
}

/// Drives one workflow context to completion.
pub struct Scheduler {
    runner: Arc<dyn Runner>,
    max_parallelism: Option<usize>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn Runner>, max_parallelism: Option<usize>) -> Self {
        Self {
            runner,
            max_parallelism,
        }
    }

    /// Run the workflow to a terminal status.
    ///
    /// # Errors
    /// - [`EngineError::DeadlockedGraph`] when no step can start at all.
    /// - [`EngineError::StepFailed`] when a `stop_on_fail` step
    ///   exhausted its retries.
    /// - [`EngineError::UnknownRoute`] when a stopping step routed to a
    ///   nonexistent target.
    ///
    /// Non-fatal failures (`stop_on_fail = false`) do not surface here;
    /// they are visible in the execution records.
    #[instrument(skip(self, ctx), fields(workflow_id = %ctx.workflow_id()))]
    pub async fn run(&self, ctx: &mut Context) -> Result<(), EngineError> {
        ctx.mark_workflow_started();

        if ctx.steps().is_empty() {
            ctx.mark_workflow_ended(WorkflowStatus::Success);
            return Ok(());
        }

        let plan = dag::build_layers(ctx.steps());
        for id in &plan.cyclic {
            ctx.record_warning(id, CYCLE_WARNING);
        }
        if plan.is_deadlocked() {
            error!("no runnable step: every step sits on a cycle");
            ctx.mark_workflow_ended(WorkflowStatus::Fail);
            return Err(EngineError::DeadlockedGraph);
        }
        if !plan.cyclic.is_empty() {
            warn!(steps = ?plan.cyclic, "cycle detected; cycle members run as trailing singletons");
        }
        info!(layers = plan.layers.len(), steps = ctx.steps().len(), "layer plan computed");

        // Live bookkeeping. In-degrees are decremented along a step's
        // *current* outgoing edges when it completes, so edges cleared
        // by routing never signal their old targets.
        let mut in_degree = dag::in_degrees(ctx.steps());
        let implicit_dependents = implicit_dependents(ctx.steps());
        let mut done: HashSet<String> = HashSet::new();
        let mut forced: HashSet<String> = HashSet::new();
        let semaphore = Arc::new(Semaphore::new(
            self.max_parallelism.unwrap_or(Semaphore::MAX_PERMITS),
        ));

        loop {
            if !ctx.is_running() {
                break;
            }

            // Next layer: every ready step, in insertion order.
            let mut layer: Vec<String> = ctx
                .steps()
                .keys()
                .filter(|id| !done.contains(*id) && in_degree[*id] == 0)
                .filter(|id| {
                    ctx.record(id)
                        .map(|r| r.status == StepStatus::Pending)
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            if layer.is_empty() {
                // Force the next unexecuted cycle member as a singleton;
                // anything else still pending was pruned by routing and
                // legitimately never runs.
                match plan
                    .cyclic
                    .iter()
                    .find(|id| !done.contains(*id) && !forced.contains(*id))
                {
                    Some(id) => {
                        forced.insert(id.clone());
                        layer = vec![id.clone()];
                    }
                    None => break,
                }
            }

            debug!(layer = ?layer, "executing layer");
            self.execute_layer(
                ctx,
                layer,
                &semaphore,
                &mut in_degree,
                &implicit_dependents,
                &mut done,
            )
            .await?;
        }

        ctx.mark_workflow_ended(WorkflowStatus::Success);
        Ok(())
    }

    /// Execute one layer end to end: validate + mark, run, merge.
    async fn execute_layer(
        &self,
        ctx: &mut Context,
        layer: Vec<String>,
        semaphore: &Arc<Semaphore>,
        in_degree: &mut IndexMap<String, usize>,
        implicit_dependents: &IndexMap<String, Vec<String>>,
        done: &mut HashSet<String>,
    ) -> Result<(), EngineError> {
        // ------------------------------------------------------------------
        // Phase 1: resolve inputs, validate, mark started, arm drivers.
        // ------------------------------------------------------------------
        let mut slots: Vec<(String, Slot)> = Vec::new();
        for id in layer {
            if !ctx.is_running() {
                break;
            }
            let inputs = ctx.resolve_inputs(&id)?;
            let (job, spec, retry, timeout) = {
                let step = ctx
                    .step(&id)
                    .ok_or_else(|| EngineError::UnknownStep(id.clone()))?;
                (
                    step.job.clone(),
                    step.inputs.clone(),
                    step.retry.unwrap_or_default(),
                    step.timeout,
                )
            };

            if let Err(reason) = job.validate(&inputs) {
                info!(step_id = id.as_str(), "validation rejected inputs: {reason}");
                ctx.mark_step_skipped(&id, "validation_failed")?;
                ctx.record_warning(&id, format!("[Skip] validation failed: {reason}"));
                slots.push((id, Slot::Skipped));
                continue;
            }

            ctx.mark_step_started(&id, &inputs)?;
            let driver = StepDriver {
                step_id: id.clone(),
                job,
                spec,
                retry,
                timeout,
                globals: ctx.globals().clone(),
                results: ctx.results().clone(),
                workflow_id: ctx.workflow_id(),
                runner: self.runner.clone(),
                semaphore: semaphore.clone(),
            };
            slots.push((id, Slot::Armed(driver)));
        }

        // ------------------------------------------------------------------
        // Phase 2: run. A single armed step runs sequentially on this
        // task; several run concurrently, all spawned before any is
        // awaited.
        // ------------------------------------------------------------------
        let armed = slots.iter().filter(|(_, s)| matches!(s, Slot::Armed(_))).count();
        let mut completions: Vec<(String, Option<StepRun>)> = Vec::new();

        if armed <= 1 {
            for (id, slot) in slots {
                match slot {
                    Slot::Skipped => completions.push((id, None)),
                    Slot::Armed(driver) => {
                        let run = driver.drive().await;
                        completions.push((id, Some(run)));
                    }
                }
            }
        } else {
            let staged: Vec<(String, Option<JoinHandle<StepRun>>)> = slots
                .into_iter()
                .map(|(id, slot)| match slot {
                    Slot::Skipped => (id, None),
                    Slot::Armed(driver) => (id, Some(tokio::spawn(driver.drive()))),
                })
                .collect();

            // Await in insertion order; completion order is irrelevant
            // because results only merge below.
            for (id, handle) in staged {
                match handle {
                    None => completions.push((id, None)),
                    Some(handle) => {
                        let run = handle.await.unwrap_or_else(|e| {
                            StepRun::from_driver_crash(format!("step driver crashed: {e}"))
                        });
                        completions.push((id, Some(run)));
                    }
                }
            }
        }

        // ------------------------------------------------------------------
        // Phase 3: merge into the context in insertion order, apply
        // routing, update graph bookkeeping, detect aborts.
        // ------------------------------------------------------------------
        let mut abort: Option<EngineError> = None;

        for (id, run) in completions {
            match run {
                None => {
                    // Skipped at validation; downstream resolves its
                    // outputs to null.
                }
                Some(run) => {
                    let step_perf = StepPerf {
                        attempts: run.attempts,
                        memory_used: run.memory_used,
                        peak_memory: run.peak_memory,
                    };
                    match run.outcome {
                        RunOutcome::Success(output) => {
                            ctx.mark_step_completed(&id, output.clone(), run.logs, step_perf)?;
                            info!(step_id = id.as_str(), attempts = run.attempts, "step succeeded");
                            self.apply_routing(ctx, &id, &output, in_degree, implicit_dependents)?;
                        }
                        RunOutcome::Failed { message } => {
                            ctx.mark_step_failed(&id, run.errors, run.logs, step_perf)?;
                            error!(
                                step_id = id.as_str(),
                                attempts = run.attempts,
                                "step failed: {message}"
                            );
                            let stops = ctx.step(&id).map(|s| s.stop_on_fail).unwrap_or(true);
                            if stops && abort.is_none() {
                                abort = Some(EngineError::StepFailed {
                                    step_id: id.clone(),
                                    attempts: run.attempts,
                                    message,
                                });
                            }
                        }
                    }
                }
            }

            done.insert(id.clone());
            decrement_successors(ctx, &id, in_degree, implicit_dependents);
        }

        if let Some(err) = abort {
            ctx.mark_workflow_ended(WorkflowStatus::Fail);
            return Err(err);
        }
        Ok(())
    }

    /// Consult the step's router/decider and splice the decision into
    /// the remaining schedule.
    fn apply_routing(
        &self,
        ctx: &mut Context,
        id: &str,
        output: &Value,
        in_degree: &mut IndexMap<String, usize>,
        implicit_dependents: &IndexMap<String, Vec<String>>,
    ) -> Result<(), EngineError> {
        let Some(step) = ctx.step(id) else {
            return Ok(());
        };
        let Some(targets) = routing_targets(step, output) else {
            return Ok(());
        };
        let stops = step.stop_on_fail;
        let old_edges = step.connections.clone();

        // Unknown targets are a routing error: fatal on a stopping
        // step, dropped (and logged) otherwise.
        let mut valid: Vec<String> = Vec::new();
        for target in targets {
            if ctx.has_step(&target) {
                if !valid.contains(&target) {
                    valid.push(target);
                }
            } else if stops {
                ctx.record_warning(id, format!("[Error] route target '{target}' does not exist"));
                ctx.mark_workflow_ended(WorkflowStatus::Fail);
                return Err(EngineError::UnknownRoute {
                    step_id: id.to_string(),
                    target,
                });
            } else {
                warn!(step_id = id, target = target.as_str(), "dropping unknown route target");
                ctx.record_warning(
                    id,
                    format!("[Error] route target '{target}' does not exist; ignoring"),
                );
            }
        }

        info!(step_id = id, targets = ?valid, "routing decision replaces outgoing edges");
        ctx.clear_outgoing_edges(id)?;
        let implicit = implicit_dependents
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for target in valid {
            // Edges that were neither declared nor implied are new to
            // the graph; their target gains an in-degree that this
            // step's completion will immediately release.
            let is_new = !old_edges.contains(&target) && !implicit.contains(&target);
            ctx.connect(id, &target)?;
            if is_new {
                if let Some(degree) = in_degree.get_mut(&target) {
                    *degree += 1;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Graph bookkeeping helpers
// ---------------------------------------------------------------------------

/// Map of step id → steps whose input specs reference it. Data edges
/// are not clearable by routing, so this is computed once per run.
fn implicit_dependents(
    steps: &IndexMap<String, StepDefinition>,
) -> IndexMap<String, Vec<String>> {
    let mut dependents: IndexMap<String, Vec<String>> =
        steps.keys().map(|id| (id.clone(), Vec::new())).collect();
    for step in steps.values() {
        for parent in step.implicit_parents() {
            if let Some(list) = dependents.get_mut(parent) {
                if !list.contains(&step.id) {
                    list.push(step.id.clone());
                }
            }
        }
    }
    dependents
}

/// Release the completed step's successors along its *current* edges.
fn decrement_successors(
    ctx: &Context,
    id: &str,
    in_degree: &mut IndexMap<String, usize>,
    implicit_dependents: &IndexMap<String, Vec<String>>,
) {
    let mut targets: Vec<String> = ctx
        .step(id)
        .map(|s| s.connections.clone())
        .unwrap_or_default();
    if let Some(implicit) = implicit_dependents.get(id) {
        for target in implicit {
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
    }
    for target in targets {
        if let Some(degree) = in_degree.get_mut(&target) {
            *degree = degree.saturating_sub(1);
        }
    }
}

/// Normalize a router answer to an optional target list. `None` keeps
/// the static edges.
fn routing_targets(step: &StepDefinition, output: &Value) -> Option<Vec<String>> {
    match &step.router {
        None => None,
        Some(StepRouter::Decider(decider)) => {
            decider.evaluate(output).map(|t| vec![t.to_string()])
        }
        Some(StepRouter::Callback(callback)) => match callback(output) {
            RouteDecision::Stay => None,
            RouteDecision::To(target) => Some(vec![target]),
            RouteDecision::Fan(targets) => Some(targets),
        },
    }
}
