//! Shared foundation crate: the Job model, its state machine, the error
//! kinds every other crate propagates, and the Job Store (spec §3, §4.A).

pub mod error;
pub mod memory;
pub mod model;
pub mod store;
pub mod transition;

pub use error::CoreError;
pub use memory::InMemoryJobStore;
pub use model::{
    ContainerOutcome, ContainerState, Job, ResultPayload, SubmissionMeta, Timing, UploadState,
};
pub use store::{JobStore, PgJobStore};
pub use transition::{apply_transition, JobTransition};
