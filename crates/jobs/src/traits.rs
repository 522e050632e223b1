//! The `Job` trait — the contract every job must fulfil.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::payload::JobPayload;
use crate::JobError;

/// Ordered mapping of resolved input name → value, exactly as the
/// scheduler hands it to the job.
pub type JobInputs = IndexMap<String, Value>;

/// Read-only view of the running workflow passed to every job.
///
/// Built fresh by the scheduler immediately before each invocation; jobs
/// must not retain it beyond the `run` call. Defined here (in the jobs
/// crate) so both the engine and individual job implementations can
/// import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// ID of the parent workflow run.
    pub workflow_id: Uuid,
    /// ID of the step currently being executed.
    pub step_id: String,
    /// Workflow-level globals, as set on the façade.
    pub globals: HashMap<String, Value>,
    /// Outputs of every step that completed before this one started.
    pub results: HashMap<String, Value>,
}

impl JobContext {
    /// Look up a single key in a prior step's output. `None` if the step
    /// has no result yet or the key is absent.
    pub fn result_of(&self, step_id: &str, key: &str) -> Option<&Value> {
        self.results.get(step_id).and_then(|out| out.get(key))
    }
}

/// The core job trait.
///
/// A job is a pure functional unit: given an ordered mapping of named
/// inputs and a read-only context view it returns a JSON output. Jobs
/// may accumulate logs and errors during a single run (see
/// [`JobJournal`]); a non-empty `errors()` collection after `run`
/// returns is treated as a failure even when `run` itself returned `Ok`.
#[async_trait]
pub trait Job: Send + Sync {
    /// Execute the job and return its output value.
    ///
    /// Non-object outputs are wrapped as `{"result": value}` by the
    /// caller, so returning a bare string or number is fine.
    async fn run(&self, inputs: &JobInputs, ctx: &JobContext) -> Result<Value, JobError>;

    /// Stable identity of this job instance (round-trips through
    /// [`JobPayload`]).
    fn id(&self) -> &str;

    /// Human-readable job name; reported in snapshots. Falls back to the
    /// runtime step id when a job does not override it.
    fn name(&self) -> String {
        self.id().to_string()
    }

    /// One-line description; empty by default.
    fn description(&self) -> String {
        String::new()
    }

    /// Pre-run input validation. An `Err` skips the step with reason
    /// `validation_failed` — no attempt is consumed and no retry happens.
    fn validate(&self, _inputs: &JobInputs) -> Result<(), String> {
        Ok(())
    }

    /// Log lines accumulated during the current run.
    fn logs(&self) -> Vec<String> {
        Vec::new()
    }

    /// Errors accumulated during the current run. Non-empty after a
    /// normal return still fails the attempt.
    fn errors(&self) -> Vec<String> {
        Vec::new()
    }

    /// Serialize this job for out-of-process execution. `None` means the
    /// job cannot cross a process boundary (e.g. closure-backed jobs).
    fn to_payload(&self) -> Option<JobPayload> {
        None
    }
}

// ---------------------------------------------------------------------------
// JobJournal
// ---------------------------------------------------------------------------

/// Interior-mutable log/error accumulator for job implementations.
///
/// Embed one in a job struct and delegate `logs()`/`errors()` to it;
/// `run` can then record from behind `&self`.
#[derive(Debug, Default)]
pub struct JobJournal {
    logs: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl JobJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a log line.
    pub fn log(&self, line: impl Into<String>) {
        self.logs.lock().unwrap().push(line.into());
    }

    /// Record an error. The attempt fails once `run` returns.
    pub fn error(&self, message: impl Into<String>) {
        self.errors.lock().unwrap().push(message.into());
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    /// Reset between attempts so each attempt reports only its own lines.
    pub fn clear(&self) {
        self.logs.lock().unwrap().clear();
        self.errors.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn journal_accumulates_and_clears() {
        let journal = JobJournal::new();
        journal.log("fetching page 1");
        journal.error("page 2 returned 500");

        assert_eq!(journal.logs(), vec!["fetching page 1"]);
        assert_eq!(journal.errors(), vec!["page 2 returned 500"]);

        journal.clear();
        assert!(journal.logs().is_empty());
        assert!(journal.errors().is_empty());
    }

    #[test]
    fn context_result_lookup() {
        let mut results = HashMap::new();
        results.insert("fetch".to_string(), json!({ "items": [1, 2, 3] }));

        let ctx = JobContext {
            workflow_id: Uuid::new_v4(),
            step_id: "sum".into(),
            globals: HashMap::new(),
            results,
        };

        assert_eq!(ctx.result_of("fetch", "items"), Some(&json!([1, 2, 3])));
        assert_eq!(ctx.result_of("fetch", "missing"), None);
        assert_eq!(ctx.result_of("ghost", "items"), None);
    }
}
