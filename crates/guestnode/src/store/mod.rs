// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Guest key/value stores.
//!
//! Every hypervisor family exposes a small key/value service to its guests.
//! The rest of the crate only relies on the two-operation [`KvStore`]
//! contract; the backends live in the submodules.

pub mod guest_tool;
pub mod kvp;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use guest_tool::{GuestToolStore, ToolDialect};
pub use kvp::KvpPoolStore;
pub use memory::MemoryStore;

/// Errors from guest store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The guest tool binary is not installed.
    #[error("Guest tool not found: {0}")]
    ToolNotFound(String),

    /// The guest tool ran but reported a failure.
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        /// Tool that was invoked.
        tool: String,
        /// Exit status description.
        status: String,
        /// Standard error output.
        stderr: String,
    },

    /// The store content could not be understood.
    #[error("Malformed store data: {0}")]
    Malformed(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Key/value service offered by the hypervisor to the guest.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key. `Ok(None)` means the key is not set.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a key, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}
