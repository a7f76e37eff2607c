//! Sync state persistence for syncbox.
//!
//! Provides [`StateFile`], which loads a prior [`SyncState`] from disk and
//! replaces it atomically (write-temp-then-rename) after a successful
//! incremental run.
//!
//! [`SyncState`]: syncbox_types::SyncState

#![warn(clippy::pedantic)]

pub mod error;
pub mod file;

pub use error::StateError;
pub use file::{atomic_write, StateFile};
