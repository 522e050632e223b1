//! `engine` crate — core domain models, topological layering, the
//! workflow context, and the execution engine.
//!
//! Layer map: [`models`] and [`retry`]/[`decider`] are the vocabulary;
//! [`context`] is the single source of truth for a run; [`dag`] computes
//! the layer plan; [`runner`] turns invocations into outcomes (in
//! process or out of process); [`scheduler`] owns the execution loop;
//! [`workflow`] is the fluent façade tying it all together.

pub mod context;
pub mod dag;
pub mod decider;
pub mod error;
pub mod models;
pub mod perf;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod snapshot;
pub mod workflow;

pub use context::Context;
pub use dag::{build_layers, LayerPlan};
pub use decider::{CompareOp, Condition, Decider, DeciderBuilder};
pub use error::{EngineError, ErrorKind};
pub use models::{
    ExecutionRecord, InputRef, InputSpec, RouteDecision, StepDefinition, StepStatus,
    WorkflowStatus,
};
pub use retry::RetryPolicy;
pub use runner::{
    InlineRunner, JobInvocation, Runner, StepOutcome, SubprocessRunner, WorkerPayload,
};
pub use scheduler::Scheduler;
pub use snapshot::ContextSnapshot;
pub use workflow::{SummaryCallback, Workflow};

#[cfg(test)]
mod scheduler_tests;
