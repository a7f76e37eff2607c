//! Container runtime adapter for syncbox connectors.
//!
//! [`ContainerRuntime`] is the narrow capability interface the engine uses
//! to pull images and drive connector containers. [`DockerCli`] implements
//! it on top of the `docker` binary; [`InMemoryRuntime`] is a scripted
//! stand-in used by tests.

#![warn(clippy::pedantic)]

pub mod adapter;
pub mod docker;
pub mod error;
pub mod memory;
pub mod spec;

pub use adapter::{
    stop_all, AttachedIo, BoxedReader, BoxedWriter, ContainerRuntime, DEFAULT_STOP_TIMEOUT,
};
pub use docker::DockerCli;
pub use error::{Result, RuntimeError};
pub use memory::InMemoryRuntime;
pub use spec::{Bind, ContainerId, ContainerSpec, HostLimits, DEFAULT_PLATFORM, WORKSPACE_MOUNT};
