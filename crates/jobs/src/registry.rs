//! Registry mapping payload `class` keys to job factories.
//!
//! The out-of-process worker builds one registry at startup and treats
//! it as read-only thereafter; there is no other process-wide state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::mock::MockJob;
use crate::payload::JobPayload;
use crate::{Job, JobError};

/// Factory turning a decoded payload back into a live job.
pub type JobFactory = fn(&JobPayload) -> Result<Arc<dyn Job>, JobError>;

/// Maps `class` strings to [`JobFactory`] functions.
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in job classes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("mock", MockJob::from_payload);
        registry
    }

    /// Register a factory for `class`. Last writer wins.
    pub fn register(&mut self, class: impl Into<String>, factory: JobFactory) {
        self.factories.insert(class.into(), factory);
    }

    /// Instantiate a job from its payload.
    ///
    /// # Errors
    /// - [`JobError::UnknownClass`] if no factory is registered.
    /// - whatever the factory returns for a malformed payload.
    pub fn instantiate(&self, payload: &JobPayload) -> Result<Arc<dyn Job>, JobError> {
        let factory = self
            .factories
            .get(&payload.class)
            .ok_or_else(|| JobError::UnknownClass(payload.class.clone()))?;
        factory(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_mock_round_trips_identity() {
        let registry = JobRegistry::with_builtins();
        let original = MockJob::returning("fetch-1", json!({ "items": [1] }));
        let payload = original.to_payload().expect("mock is serializable");

        let revived = registry.instantiate(&payload).unwrap();
        assert_eq!(revived.id(), original.id());
        assert_eq!(revived.to_payload().unwrap().class, payload.class);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let registry = JobRegistry::with_builtins();
        let payload = JobPayload::new("no-such-class", "x");
        assert!(matches!(
            registry.instantiate(&payload),
            Err(JobError::UnknownClass(class)) if class == "no-such-class"
        ));
    }
}
