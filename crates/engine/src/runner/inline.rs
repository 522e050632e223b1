//! In-process runner: invoke the job directly on the calling task.

use async_trait::async_trait;
use futures::FutureExt;
use jobs::{JobError, JobResult, JobStatus};
use serde_json::json;
use std::panic::AssertUnwindSafe;

use crate::error::ErrorKind;
use crate::perf;
use crate::runner::{JobInvocation, Runner, StepOutcome};

/// Runs jobs by calling `Job::run` in the current process.
///
/// The default runner. Panics and `Err` returns are caught at this
/// boundary and normalized into failed outcomes; a job that returns
/// `Ok` while its journal carries errors fails the attempt too.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineRunner;

impl InlineRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for InlineRunner {
    async fn run_job(&self, invocation: &JobInvocation) -> StepOutcome {
        let memory_before = perf::current_memory();
        let ctx = invocation.job_context();
        let mut attempt = JobResult::begin(
            &invocation.step_id,
            invocation.job.name(),
            invocation.attempt,
            json!(invocation.inputs),
        );

        let run = AssertUnwindSafe(invocation.job.run(&invocation.inputs, &ctx))
            .catch_unwind()
            .await;

        let outcome = match run {
            Ok(Ok(value)) => {
                attempt.logs = invocation.job.logs();
                attempt.errors = invocation.job.errors();
                attempt.finish(value);
                if attempt.status == JobStatus::Success {
                    StepOutcome::ok(attempt.output).with_logs(attempt.logs)
                } else {
                    StepOutcome::failure(
                        ErrorKind::JobReportedError,
                        attempt.errors.join("; "),
                    )
                    .with_logs(attempt.logs)
                    .with_errors(attempt.errors)
                }
            }
            Ok(Err(error)) => {
                let kind = match &error {
                    JobError::Validation(_) => ErrorKind::InputValidation,
                    _ => ErrorKind::JobException,
                };
                StepOutcome::failure(kind, error.to_string())
                    .with_logs(invocation.job.logs())
                    .with_errors(invocation.job.errors())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                StepOutcome::failure(ErrorKind::JobException, format!("job panicked: {message}"))
            }
        };

        let memory_after = perf::current_memory();
        outcome.with_memory(
            memory_after.saturating_sub(memory_before),
            memory_before.max(memory_after),
        )
    }
}
