// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker command construction and spawning.
//!
//! Worker argv layout:
//!
//! ```text
//! <program> <dynamic properties...> <fixed worker args...> <mode args...>
//!
//! pre-registered: --coordinator <url> --credentials <creds> --node-source <ns>
//!                 --holding-vm <id> --index <i>
//! rendezvous:     --rendezvous-port <port> --holding-vm <id> --index <i>
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::process::Child;
use tracing::{error, info};

use crate::extract::{RemoteCoordinator, RuntimeConfig};
use crate::launcher::Launcher;

/// How spawned workers find their coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Workers register with the remote coordinator by themselves.
    PreRegistered(RemoteCoordinator),
    /// Workers report their address to the local rendezvous port.
    Rendezvous {
        /// Loopback port of the rendezvous server.
        port: u16,
    },
}

impl LaunchMode {
    /// Short mode name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreRegistered(_) => "pre_registered",
            Self::Rendezvous { .. } => "rendezvous",
        }
    }
}

/// Fully built launch command of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Worker index (1-based).
    pub index: u32,
    /// Executable.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Rendezvous port embedded in `args`, if any.
    pub rendezvous_port: Option<u16>,
}

/// A spawned worker process.
#[derive(Debug)]
pub struct WorkerHandle {
    /// Worker index (1-based).
    pub index: u32,
    /// PID captured at spawn time.
    pub pid: Option<u32>,
    /// When the worker was started.
    pub started_at: DateTime<Utc>,
    pub(crate) child: Child,
}

impl WorkerHandle {
    /// Wrap a freshly spawned child.
    pub fn new(index: u32, child: Child) -> Self {
        Self {
            index,
            pid: child.id(),
            started_at: Utc::now(),
            child,
        }
    }
}

/// Result of spawning all workers.
#[derive(Debug, Default)]
pub struct SpawnOutcome {
    /// Workers actually started, in index order.
    pub handles: Vec<WorkerHandle>,
    /// Number of workers that could not be started.
    pub failures: usize,
}

/// Builds worker commands and starts them through a [`Launcher`].
pub struct WorkerSpawner {
    launcher: Arc<dyn Launcher>,
    program: String,
    base_args: Vec<String>,
}

impl WorkerSpawner {
    /// Create a spawner launching `program base_args...` through `launcher`.
    pub fn new(launcher: Arc<dyn Launcher>, program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            launcher,
            program: program.into(),
            base_args,
        }
    }

    /// Build the command of the worker with `index`.
    pub fn build_command(&self, config: &RuntimeConfig, mode: &LaunchMode, index: u32) -> WorkerCommand {
        let mut args = config.dynamic_properties.clone();
        args.extend(self.base_args.iter().cloned());

        let rendezvous_port = match mode {
            LaunchMode::PreRegistered(remote) => {
                args.extend([
                    "--coordinator".to_string(),
                    remote.coordinator_url.clone(),
                    "--credentials".to_string(),
                    remote.credentials.clone(),
                    "--node-source".to_string(),
                    remote.node_source.clone(),
                ]);
                None
            }
            LaunchMode::Rendezvous { port } => {
                args.extend(["--rendezvous-port".to_string(), port.to_string()]);
                Some(*port)
            }
        };

        args.extend([
            "--holding-vm".to_string(),
            config.holding_vm.clone(),
            "--index".to_string(),
            index.to_string(),
        ]);

        WorkerCommand {
            index,
            program: self.program.clone(),
            args,
            rendezvous_port,
        }
    }

    /// Build the commands of all `host_capacity` workers.
    pub fn build_commands(&self, config: &RuntimeConfig, mode: &LaunchMode) -> Vec<WorkerCommand> {
        (1..=config.host_capacity)
            .map(|index| self.build_command(config, mode, index))
            .collect()
    }

    /// Start every worker. A failed launch is logged and skipped.
    pub fn spawn_all(&self, config: &RuntimeConfig, mode: &LaunchMode) -> SpawnOutcome {
        let mut outcome = SpawnOutcome::default();

        for command in self.build_commands(config, mode) {
            match self.launcher.launch(&command) {
                Ok(child) => {
                    let handle = WorkerHandle::new(command.index, child);
                    info!(
                        index = handle.index,
                        pid = ?handle.pid,
                        mode = mode.name(),
                        launcher = self.launcher.launcher_type(),
                        "Worker started"
                    );
                    outcome.handles.push(handle);
                }
                Err(e) => {
                    error!(
                        index = command.index,
                        program = %command.program,
                        error = %e,
                        "Failed to start worker"
                    );
                    outcome.failures += 1;
                }
            }
        }

        outcome
    }
}
