//! Sessions and their append-only event logs

mod file_store;
mod model;

pub use file_store::FileSessionStore;
pub use model::{Session, SessionEvent, SessionStatus};
