// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Guestnode - Compute Node Bootstrap for Virtual Machines
//!
//! This crate runs inside a freshly booted guest. It figures out which
//! hypervisor is hosting it, reads the launch parameters the host pushed
//! into the guest's key/value store, starts the requested number of worker
//! processes and, when the workers cannot register with the coordinator by
//! themselves, collects their callback addresses and publishes them back
//! through the store.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                              Hypervisor                               │
//! │        (VMware guestinfo / VirtualBox properties / xenstore / KVP)    │
//! └───────────────────────────────────────────────────────────────────────┘
//!                 ▲ nodeUrl.<n>                │ holdingVM, hostCapacity,
//!                 │                            │ dynamic.<n>, rmUrl, ...
//!                 │                            ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                         guestnode (This Crate)                        │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌─────────────────┐  │
//! │  │  Provider  │  │   Config   │  │   Worker   │  │   Rendezvous    │  │
//! │  │  Registry  │─►│ Extractor  │─►│  Spawner   │─►│  127.0.0.1:<p>  │  │
//! │  └────────────┘  └────────────┘  └────────────┘  └─────────────────┘  │
//! │                        Lifecycle Supervisor                           │
//! └───────────────────────────────────────────────────────────────────────┘
//!                                      │ spawn         ▲ "<address> EOF"
//!                                      ▼               │
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                     Worker processes (1..=hostCapacity)               │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modes
//!
//! | Mode | Selected when | Workers are told |
//! |------|---------------|------------------|
//! | Pre-registered | `rmUrl` holds a URL | coordinator URL, credentials, node source |
//! | Rendezvous | no usable `rmUrl` | loopback rendezvous port |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GUESTNODE_WORKER_PROGRAM` | `java` | Worker executable |
//! | `GUESTNODE_WORKER_ARGS` | - | Fixed worker arguments (whitespace separated) |
//! | `GUESTNODE_PROVIDERS` | `vmware,virtualbox,xenserver,hyperv` | Probe order |
//! | `GUESTNODE_PROBE_INTERVAL_SECS` | `10` | Sleep between probe passes |
//! | `GUESTNODE_ACCEPT_TIMEOUT_SECS` | `60` | Rendezvous accept timeout |
//! | `GUESTNODE_RECV_TIMEOUT_SECS` | `30` | Rendezvous read timeout |
//! | `GUESTNODE_ACCEPT_MAX_ATTEMPTS` | `5` | Failed accepts tolerated per slot |
//! | `GUESTNODE_RECV_MAX_ATTEMPTS` | `5` | Failed reads tolerated per connection |
//! | `GUESTNODE_DYNAMIC_SCAN_LIMIT` | `10000` | Cap on `dynamic.<n>` lookups |
//!
//! # Modules
//!
//! - [`config`]: Process configuration from environment variables
//! - [`error`]: Error types
//! - [`store`]: Guest key/value store backends
//! - [`provider`]: Hypervisor providers and the probing registry
//! - [`extract`]: Launch parameter extraction
//! - [`launcher`]: Worker process launch backends
//! - [`spawner`]: Worker command construction
//! - [`retry`]: Bounded retry combinator
//! - [`rendezvous`]: Loopback address collection
//! - [`supervisor`]: Worker and socket lifecycle
//! - [`orchestrator`]: End-to-end bootstrap flow

#![deny(missing_docs)]

/// Process configuration loaded from environment variables.
pub mod config;

/// Error types for guestnode operations.
pub mod error;

/// Guest key/value store backends.
pub mod store;

/// Hypervisor providers and registry.
pub mod provider;

/// Launch parameter extraction from the guest store.
pub mod extract;

/// Worker launch backends (native process, mock).
pub mod launcher;

/// Worker command construction and spawning.
pub mod spawner;

/// Bounded retry ("circuit breaker").
pub mod retry;

/// Loopback rendezvous server collecting worker addresses.
pub mod rendezvous;

/// Lifecycle supervision of workers and the rendezvous socket.
pub mod supervisor;

/// End-to-end bootstrap orchestration.
pub mod orchestrator;

pub use config::Config;
pub use error::Error;
pub use orchestrator::{Orchestrator, RunSummary};
