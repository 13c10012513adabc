//! Job orchestration
//!
//! The [`JobOrchestrator`] owns every [`Job`] aggregate and is the
//! only writer of its state machine; external callers (UI, CLI) read
//! snapshots and issue control requests (submit, cancel, retry).

mod orchestrator;
mod runner;
mod types;

pub use orchestrator::JobOrchestrator;
pub use types::{
    FailureKind, Job, JobError, JobFailure, JobStatus, SourceData, SourceFile,
};
