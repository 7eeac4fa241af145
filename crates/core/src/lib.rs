//! Core library for the agent orchestrator
//!
//! This crate contains the shared domain logic, including:
//! - Run records and their dispatch state machine
//! - Sessions and their event logs
//! - Runner identity and registry records
//! - Agent blueprint placeholder resolution
//! - Wire types shared by the coordinator and the runner

pub mod api;
pub mod blueprint;
pub mod error;
pub mod run;
pub mod runner;
pub mod session;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
