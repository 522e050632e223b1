//! Job-level error type.

use thiserror::Error;

/// Errors returned by a job's `run` method or by payload handling.
///
/// The engine uses the variant to decide what happens to the step:
/// - `Validation` — the step is skipped (reason `validation_failed`);
///   no attempt is consumed.
/// - everything else — the attempt fails and is retried per the step's
///   retry policy.
#[derive(Debug, Error, Clone)]
pub enum JobError {
    /// The job's pre-run validation rejected the resolved inputs.
    #[error("input validation failed: {0}")]
    Validation(String),

    /// The job raised during `run`.
    #[error("job failed: {0}")]
    Failed(String),

    /// No factory registered for the payload's `class`.
    #[error("unknown job class '{0}'")]
    UnknownClass(String),

    /// A payload could not be decoded back into a job.
    #[error("malformed job payload: {0}")]
    Payload(String),
}
