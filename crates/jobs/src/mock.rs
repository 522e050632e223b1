//! `MockJob` — a test double for `Job`.
//!
//! Used throughout the engine's unit and acceptance tests where a real
//! domain job is either unavailable or irrelevant. The scripted
//! behaviours cover every failure path the scheduler distinguishes:
//! clean success, raised errors, journal-reported errors, flaky
//! fail-then-succeed sequences, slow jobs for timeout tests, and
//! validation rejection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::payload::JobPayload;
use crate::traits::{Job, JobContext, JobInputs, JobJournal};
use crate::JobError;

/// Behaviour injected into `MockJob` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail every attempt with `JobError::Failed`.
    FailWith(String),
    /// Return `Ok` but leave an error in the journal — exercises the
    /// "job reported an error without raising" path.
    ReportError(String),
    /// Fail the first `failures` attempts, then return `then`.
    FailTimes { failures: u32, message: String, then: Value },
    /// Sleep before returning — for timeout tests. The sleep shortens to
    /// `retry_delay` on attempts after the first so recovery can be
    /// scripted.
    SleepThen { delay: Duration, retry_delay: Duration, value: Value },
    /// Reject the inputs during `validate`.
    RejectValidation(String),
}

/// A mock job that records every call it receives and follows a
/// programmer-specified script.
pub struct MockJob {
    id: String,
    name: Option<String>,
    description: String,
    behaviour: MockBehaviour,
    journal: JobJournal,
    attempts_seen: AtomicU32,
    /// All inputs seen by this job, in call order.
    pub calls: Arc<Mutex<Vec<JobInputs>>>,
}

impl MockJob {
    pub fn new(id: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: String::new(),
            behaviour,
            journal: JobJournal::new(),
            attempts_seen: AtomicU32::new(0),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A mock that always succeeds with the given value.
    pub fn returning(id: impl Into<String>, value: Value) -> Self {
        Self::new(id, MockBehaviour::ReturnValue(value))
    }

    /// A mock that always fails.
    pub fn failing(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(id, MockBehaviour::FailWith(message.into()))
    }

    /// A mock that fails `failures` times, then succeeds with `then`.
    pub fn flaky(id: impl Into<String>, failures: u32, then: Value) -> Self {
        Self::new(
            id,
            MockBehaviour::FailTimes {
                failures,
                message: "transient failure".into(),
                then,
            },
        )
    }

    /// A mock that sleeps `delay` on the first attempt and `retry_delay`
    /// afterwards, then succeeds with `value`.
    pub fn sleepy(id: impl Into<String>, delay: Duration, retry_delay: Duration, value: Value) -> Self {
        Self::new(id, MockBehaviour::SleepThen { delay, retry_delay, value })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Number of times this job has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Factory for [`crate::JobRegistry`]; understands the payload
    /// shapes produced by [`Job::to_payload`] below.
    pub fn from_payload(payload: &JobPayload) -> Result<Arc<dyn Job>, JobError> {
        let data = payload
            .data
            .as_ref()
            .ok_or_else(|| JobError::Payload("mock payload missing data".into()))?;

        let behaviour = match data.get("behaviour").and_then(Value::as_str) {
            Some("return") => MockBehaviour::ReturnValue(data.get("value").cloned().unwrap_or(Value::Null)),
            Some("fail") => MockBehaviour::FailWith(
                data.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("mock failure")
                    .to_string(),
            ),
            Some("sleep") => MockBehaviour::SleepThen {
                delay: Duration::from_secs_f64(
                    data.get("seconds").and_then(Value::as_f64).unwrap_or(0.0),
                ),
                retry_delay: Duration::from_secs_f64(
                    data.get("retry_seconds").and_then(Value::as_f64).unwrap_or(0.0),
                ),
                value: data.get("value").cloned().unwrap_or(Value::Null),
            },
            other => {
                return Err(JobError::Payload(format!(
                    "unknown mock behaviour: {other:?}"
                )))
            }
        };

        Ok(Arc::new(MockJob::new(payload.id.clone(), behaviour)))
    }
}

#[async_trait]
impl Job for MockJob {
    async fn run(&self, inputs: &JobInputs, _ctx: &JobContext) -> Result<Value, JobError> {
        self.calls.lock().unwrap().push(inputs.clone());
        self.journal.clear();
        let attempt = self.attempts_seen.fetch_add(1, Ordering::SeqCst) + 1;

        match &self.behaviour {
            MockBehaviour::ReturnValue(value) => Ok(value.clone()),
            MockBehaviour::FailWith(message) => Err(JobError::Failed(message.clone())),
            MockBehaviour::ReportError(message) => {
                self.journal.error(message.clone());
                Ok(Value::Null)
            }
            MockBehaviour::FailTimes { failures, message, then } => {
                if attempt <= *failures {
                    Err(JobError::Failed(message.clone()))
                } else {
                    Ok(then.clone())
                }
            }
            MockBehaviour::SleepThen { delay, retry_delay, value } => {
                let nap = if attempt == 1 { *delay } else { *retry_delay };
                tokio::time::sleep(nap).await;
                Ok(value.clone())
            }
            MockBehaviour::RejectValidation(_) => Ok(Value::Null),
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.clone())
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn validate(&self, _inputs: &JobInputs) -> Result<(), String> {
        match &self.behaviour {
            MockBehaviour::RejectValidation(reason) => Err(reason.clone()),
            _ => Ok(()),
        }
    }

    fn logs(&self) -> Vec<String> {
        self.journal.logs()
    }

    fn errors(&self) -> Vec<String> {
        self.journal.errors()
    }

    fn to_payload(&self) -> Option<JobPayload> {
        let data = match &self.behaviour {
            MockBehaviour::ReturnValue(value) => json!({ "behaviour": "return", "value": value }),
            MockBehaviour::FailWith(message) => json!({ "behaviour": "fail", "message": message }),
            MockBehaviour::SleepThen { delay, retry_delay, value } => json!({
                "behaviour": "sleep",
                "seconds": delay.as_secs_f64(),
                "retry_seconds": retry_delay.as_secs_f64(),
                "value": value,
            }),
            // Counter- and journal-based behaviours are test-local; they
            // do not cross a process boundary.
            _ => return None,
        };
        Some(JobPayload::new("mock", self.id.clone()).with_data(data))
    }
}
