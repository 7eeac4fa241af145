//! Runner identity and registry records

mod file_store;
mod model;

pub use file_store::FileRunnerStore;
pub use model::{derive_runner_id, RunnerInfo, RunnerStatus};
