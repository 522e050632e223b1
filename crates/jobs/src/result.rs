//! `JobResult` — the record of one step attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Status of a single job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Success,
    Failed,
}

/// Everything recorded about one execution attempt of one step.
///
/// Built by the runner at invocation time and finalized with
/// [`JobResult::finish`] once the job returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub step_id: String,
    pub job_name: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub status: JobStatus,
    /// Output mapping; always a JSON object once finished.
    pub output: Value,
    pub errors: Vec<String>,
    pub logs: Vec<String>,
    /// The resolved inputs this attempt ran with.
    pub input: Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in seconds.
    pub duration: f64,
}

impl JobResult {
    /// Start a new attempt record with the clock running.
    pub fn begin(
        step_id: impl Into<String>,
        job_name: impl Into<String>,
        attempt: u32,
        input: Value,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            job_name: job_name.into(),
            attempt,
            status: JobStatus::Pending,
            output: Value::Null,
            errors: Vec::new(),
            logs: Vec::new(),
            input,
            started_at: Utc::now(),
            ended_at: None,
            duration: 0.0,
        }
    }

    /// Finalize the attempt: stamp the end time, derive the status from
    /// the error list, and store the output. Non-object outputs are
    /// wrapped as `{"result": value}` so downstream key lookups work
    /// uniformly.
    pub fn finish(&mut self, output: Value) {
        let ended = Utc::now();
        self.duration = (ended - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.ended_at = Some(ended);
        self.status = if self.errors.is_empty() {
            JobStatus::Success
        } else {
            JobStatus::Failed
        };
        self.output = match output {
            Value::Object(_) => output,
            other => json!({ "result": other }),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_without_errors_is_success() {
        let mut result = JobResult::begin("fetch", "fetch", 1, json!({}));
        result.finish(json!({ "items": [1, 2] }));

        assert_eq!(result.status, JobStatus::Success);
        assert!(result.ended_at.is_some());
        assert_eq!(result.output["items"], json!([1, 2]));
    }

    #[test]
    fn finish_with_errors_is_failed() {
        let mut result = JobResult::begin("fetch", "fetch", 2, json!({}));
        result.errors.push("connection reset".into());
        result.finish(Value::Null);

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.attempt, 2);
    }

    #[test]
    fn scalar_output_is_wrapped() {
        let mut result = JobResult::begin("count", "count", 1, json!({}));
        result.finish(json!(42));

        assert_eq!(result.output, json!({ "result": 42 }));
    }
}
