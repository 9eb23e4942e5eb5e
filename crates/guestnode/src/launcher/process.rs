// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Native process launcher.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use super::{LaunchError, Launcher, Result};
use crate::spawner::WorkerCommand;

/// Launches workers as direct child processes.
///
/// Workers inherit stdout/stderr so their output ends up next to the
/// bootstrapper's own log.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    /// Create a new process launcher.
    pub fn new() -> Self {
        Self
    }
}

impl Launcher for ProcessLauncher {
    fn launcher_type(&self) -> &'static str {
        "process"
    }

    fn launch(&self, command: &WorkerCommand) -> Result<Child> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        match cmd.spawn() {
            Ok(child) => {
                debug!(
                    index = command.index,
                    pid = ?child.id(),
                    program = %command.program,
                    "Worker process created"
                );
                Ok(child)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LaunchError::ProgramNotFound(command.program.clone()))
            }
            Err(e) => Err(LaunchError::StartFailed {
                index: command.index,
                reason: e.to_string(),
            }),
        }
    }
}
