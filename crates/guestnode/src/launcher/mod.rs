// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker launch backends.
//!
//! A launcher turns a fully built [`WorkerCommand`] into a running child
//! process. It knows nothing about providers or rendezvous; the spawner
//! builds the command and the supervisor owns the resulting child.

pub mod mock;
pub mod process;

use thiserror::Error;
use tokio::process::Child;

use crate::spawner::WorkerCommand;

pub use mock::MockLauncher;
pub use process::ProcessLauncher;

/// Errors from launching a worker.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// Worker executable was not found.
    #[error("Worker program not found: {0}")]
    ProgramNotFound(String),

    /// Process could not be created.
    #[error("Failed to start worker {index}: {reason}")]
    StartFailed {
        /// Worker index.
        index: u32,
        /// Failure description.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for launch operations.
pub type Result<T> = std::result::Result<T, LaunchError>;

/// Trait for worker launchers.
pub trait Launcher: Send + Sync {
    /// Launcher type identifier (e.g., "process", "mock")
    fn launcher_type(&self) -> &'static str;

    /// Start `command` and hand back the child process.
    ///
    /// Must be called from within a tokio runtime.
    fn launch(&self, command: &WorkerCommand) -> Result<Child>;
}
