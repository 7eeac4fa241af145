mod file_store;
mod model;
mod repository;

pub use file_store::FileRunStore;
pub use model::{Run, RunSpec, RunStatus, RunSummary, RunType, TransitionOutcome};
pub use repository::{ClaimFilter, RunRepository};
