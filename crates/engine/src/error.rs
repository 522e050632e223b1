//! Engine-level error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the workflow engine (construction + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Construction errors ------

    /// Two steps share the same ID.
    #[error("duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    /// An operation referenced a step ID that doesn't exist.
    #[error("unknown step: '{0}'")]
    UnknownStep(String),

    // ------ Execution errors ------

    /// Every step sits on a cycle; nothing can run at all.
    #[error("workflow graph has no runnable step (every step is on a cycle)")]
    DeadlockedGraph,

    /// A stop-on-fail step exhausted its retries; the workflow aborted.
    #[error("step '{step_id}' failed after {attempts} attempt(s): {message}")]
    StepFailed {
        step_id: String,
        attempts: u32,
        message: String,
    },

    /// A router or decider named a step that doesn't exist.
    #[error("step '{step_id}' routed to unknown step '{target}'")]
    UnknownRoute { step_id: String, target: String },
}

/// Classification of a failed (or skipped) attempt.
///
/// Carried on [`crate::runner::StepOutcome`] so the scheduler can react
/// to the tag instead of parsing messages; also part of the worker wire
/// format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Pre-run validation rejected the inputs; the step is skipped.
    InputValidation,
    /// The job raised (or panicked) during `run`.
    JobException,
    /// The job returned normally but reported errors.
    JobReportedError,
    /// The per-step (or per-process) timeout elapsed.
    Timeout,
    /// A routing decision named a nonexistent step.
    UnknownRoute,
    /// The step sits on a dependency cycle.
    CycleDetected,
}
