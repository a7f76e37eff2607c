//! Sync orchestrator for containerized source and destination connectors.
//!
//! Resolves a [`RunConfig`](syncbox_types::RunConfig), prepares the per-run
//! workspace, drives connector containers through a
//! [`ContainerRuntime`](syncbox_runtime::ContainerRuntime), streams their
//! line-delimited JSON protocol, and persists the final sync state.

#![warn(clippy::pedantic)]

pub mod check;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod result;
pub mod session;
pub mod workspace;

pub use check::{check_connection, check_connection_until};
pub use config::{resolve_run_config, RunOptions};
pub use error::{Result, SyncError};
pub use orchestrator::Orchestrator;
pub use result::{CheckReport, RunSummary};
