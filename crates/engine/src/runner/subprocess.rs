//! Out-of-process runner: one worker subprocess per job.
//!
//! Handoff protocol: the invocation is serialized to a temp file whose
//! path is the worker's single argument; the worker prints one
//! [`StepOutcome`] JSON document to stdout. A non-zero exit or
//! unparseable stdout becomes a failed outcome carrying the stderr
//! tail. The temp file is removed unconditionally when the invocation
//! finishes (RAII on [`tempfile::NamedTempFile`]).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use indexmap::IndexMap;
use jobs::{JobError, JobInputs, JobPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::runner::{JobInvocation, Runner, StepOutcome};

/// Default cap on one worker process's lifetime.
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(300);

/// How much of a failed worker's stderr to quote in the outcome.
const STDERR_TAIL_BYTES: usize = 512;

// ---------------------------------------------------------------------------
// Worker wire format
// ---------------------------------------------------------------------------

/// Contents of the temp file handed to a worker process.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub step_id: String,
    /// Base64 of the job payload JSON (`{class, id, data?}`).
    pub job: String,
    pub inputs: JobInputs,
    pub globals: IndexMap<String, Value>,
    pub workflow_id: Uuid,
}

impl WorkerPayload {
    /// Package an invocation for shipment.
    ///
    /// # Errors
    /// [`JobError::Payload`] when the job is not serializable.
    pub fn from_invocation(invocation: &JobInvocation) -> Result<Self, JobError> {
        let payload = invocation.job.to_payload().ok_or_else(|| {
            JobError::Payload(format!(
                "job '{}' is not serializable for out-of-process execution",
                invocation.job.id()
            ))
        })?;
        let encoded = serde_json::to_vec(&payload)
            .map_err(|e| JobError::Payload(format!("job payload not serializable: {e}")))?;

        Ok(Self {
            step_id: invocation.step_id.clone(),
            job: BASE64.encode(encoded),
            inputs: invocation.inputs.clone(),
            globals: invocation.globals.clone(),
            workflow_id: invocation.workflow_id,
        })
    }

    /// Decode the embedded job payload on the worker side.
    ///
    /// # Errors
    /// [`JobError::Payload`] on base64 or JSON corruption.
    pub fn decode_job(&self) -> Result<JobPayload, JobError> {
        let bytes = BASE64
            .decode(&self.job)
            .map_err(|e| JobError::Payload(format!("invalid base64 job payload: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| JobError::Payload(format!("invalid job payload JSON: {e}")))
    }

}

// ---------------------------------------------------------------------------
// SubprocessRunner
// ---------------------------------------------------------------------------

/// Spawns one worker process per job invocation.
pub struct SubprocessRunner {
    command: PathBuf,
    args: Vec<String>,
    process_timeout: Duration,
}

impl SubprocessRunner {
    /// `command` is the worker executable; `args` precede the temp file
    /// path (e.g. `["worker"]` for the bundled CLI).
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            process_timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }

    /// Worker runner backed by this very executable's `worker`
    /// subcommand.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["worker".to_string()]))
    }

    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    fn stderr_tail(stderr: &[u8]) -> String {
        let text = String::from_utf8_lossy(stderr);
        let trimmed = text.trim();
        if trimmed.len() > STDERR_TAIL_BYTES {
            let start = trimmed.len() - STDERR_TAIL_BYTES;
            // Stay on a char boundary.
            let start = (start..trimmed.len())
                .find(|i| trimmed.is_char_boundary(*i))
                .unwrap_or(start);
            format!("…{}", &trimmed[start..])
        } else {
            trimmed.to_string()
        }
    }
}

#[async_trait]
impl Runner for SubprocessRunner {
    async fn run_job(&self, invocation: &JobInvocation) -> StepOutcome {
        let payload = match WorkerPayload::from_invocation(invocation) {
            Ok(payload) => payload,
            Err(e) => return StepOutcome::failure(ErrorKind::JobException, e.to_string()),
        };

        // The temp file lives exactly as long as this scope; drop
        // deletes it no matter how the invocation ends.
        let handoff = match tempfile::NamedTempFile::new() {
            Ok(file) => file,
            Err(e) => {
                return StepOutcome::failure(
                    ErrorKind::JobException,
                    format!("cannot create worker handoff file: {e}"),
                )
            }
        };
        let encoded = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                return StepOutcome::failure(
                    ErrorKind::JobException,
                    format!("cannot encode worker payload: {e}"),
                )
            }
        };
        if let Err(e) = std::fs::write(handoff.path(), &encoded) {
            return StepOutcome::failure(
                ErrorKind::JobException,
                format!("cannot write worker handoff file: {e}"),
            );
        }

        let child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg(handoff.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                error!(
                    step_id = invocation.step_id.as_str(),
                    "failed to spawn worker '{}': {e}",
                    self.command.display()
                );
                return StepOutcome::failure(
                    ErrorKind::JobException,
                    format!("failed to spawn worker: {e}"),
                );
            }
        };

        let output = match tokio::time::timeout(self.process_timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return StepOutcome::failure(
                    ErrorKind::JobException,
                    format!("worker I/O error: {e}"),
                )
            }
            // kill_on_drop reaps the stuck worker.
            Err(_elapsed) => {
                return StepOutcome::failure(
                    ErrorKind::Timeout,
                    format!(
                        "worker exceeded process timeout of {:.0}s",
                        self.process_timeout.as_secs_f64()
                    ),
                )
            }
        };

        if !output.status.success() {
            return StepOutcome::failure(
                ErrorKind::JobException,
                format!(
                    "worker exited with {}: {}",
                    output.status,
                    Self::stderr_tail(&output.stderr)
                ),
            );
        }

        match serde_json::from_slice::<StepOutcome>(&output.stdout) {
            Ok(outcome) => outcome,
            Err(e) => StepOutcome::failure(
                ErrorKind::JobException,
                format!(
                    "unparseable worker output ({e}): {}",
                    Self::stderr_tail(&output.stderr)
                ),
            ),
        }
    }
}
