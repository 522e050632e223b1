//! `jobs` crate — the `Job` trait and everything a job needs to exist.
//!
//! Every job — domain implementations and test doubles alike — must
//! implement [`Job`]. The engine crate dispatches execution through this
//! trait object and never learns concrete job types.
//!
//! Shared vocabulary types (`JobContext`, `JobInputs`) live here, not in
//! the engine, so job implementations can be written without a circular
//! dependency on the scheduler.

pub mod error;
pub mod func;
pub mod mock;
pub mod payload;
pub mod registry;
pub mod result;
pub mod traits;

pub use error::JobError;
pub use payload::JobPayload;
pub use registry::JobRegistry;
pub use result::{JobResult, JobStatus};
pub use traits::{Job, JobContext, JobInputs, JobJournal};
