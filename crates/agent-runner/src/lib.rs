//! Agent Runner - claims runs from the coordinator and executes them
//!
//! One runner process per (host, project directory, executor profile).
//! It registers, long-polls for work, spawns the executor adapter per
//! run, and exposes two loopback servers to the subprocess: the session
//! gateway and the orchestration facade.

pub mod active;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod facade;
pub mod gateway;
pub mod heartbeat;
pub mod output;
pub mod payload;
pub mod poller;
pub mod process;
pub mod profile;
pub mod supervisor;

pub use cli::Cli;
pub use client::{CoordinatorApi, HttpCoordinatorClient};
pub use config::{RunnerConfig, RunnerIdentity};
pub use error::{Result, RunnerError};
pub use profile::ExecutorProfile;
