//! `FnJob` — wrap a plain closure as a [`Job`].
//!
//! The shortest path from a function to a workflow step. Closure-backed
//! jobs cannot be serialized, so they only run on the in-process runner.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{Job, JobContext, JobInputs};
use crate::JobError;

type JobFn = dyn Fn(&JobInputs, &JobContext) -> Result<Value, JobError> + Send + Sync;

/// A job backed by a synchronous closure.
pub struct FnJob {
    id: String,
    name: Option<String>,
    description: String,
    func: Arc<JobFn>,
}

impl FnJob {
    pub fn new<F>(id: impl Into<String>, func: F) -> Self
    where
        F: Fn(&JobInputs, &JobContext) -> Result<Value, JobError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: None,
            description: String::new(),
            func: Arc::new(func),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[async_trait]
impl Job for FnJob {
    async fn run(&self, inputs: &JobInputs, ctx: &JobContext) -> Result<Value, JobError> {
        (self.func)(inputs, ctx)
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
}
