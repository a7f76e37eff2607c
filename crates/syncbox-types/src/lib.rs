//! Shared syncbox run-configuration, protocol, and state types.
//!
//! Kept free of runtime dependencies so the engine, runtime adapter, and
//! state crates can share them without circular dependencies.

#![warn(clippy::pedantic)]

pub mod config;
pub mod protocol;
pub mod role;
pub mod state;

pub use config::{
    ConnectorSpec, HandoffMode, LogLevel, ResourceLimits, RunConfig, RunMode, SourceOutput,
};
pub use protocol::{ConnectionStatus, ConnectionStatusKind, MessageType, ProtocolMessage};
pub use role::Role;
pub use state::SyncState;
