// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for guestnode.

use thiserror::Error;

/// Guestnode errors.
///
/// Only failures that stop a run before any worker starts reach this type.
/// Probe, spawn, rendezvous, write-back and cleanup failures degrade the
/// run and are logged where they happen.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Launch parameters in the guest store are missing or unusable.
    #[error(transparent)]
    Configuration(#[from] crate::extract::ConfigurationError),

    /// The rendezvous socket could not be bound.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type using guestnode Error.
pub type Result<T> = std::result::Result<T, Error>;
