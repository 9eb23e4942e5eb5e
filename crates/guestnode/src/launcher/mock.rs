// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock launcher for testing.
//!
//! Records every command it is asked to launch and starts a harmless
//! stand-in process instead of the real worker. In rendezvous mode it can
//! also play the worker's part of the callback protocol from a background
//! task, so the whole bootstrap flow runs without a worker binary.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use super::{LaunchError, Launcher, Result};
use crate::rendezvous::END_OF_MESSAGE;
use crate::spawner::WorkerCommand;

/// What a simulated worker does once launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerBehavior {
    /// Never connects back.
    Silent,
    /// Sends its address and the end marker in a single write.
    ReportAddress,
    /// Sends its address, pauses, then sends the end marker separately.
    ReportAddressSplit,
    /// Connects and closes without sending anything.
    EmptyThenClose,
    /// The launch itself fails.
    FailLaunch,
}

/// Mock launcher for testing.
pub struct MockLauncher {
    launched: Mutex<Vec<WorkerCommand>>,
    pids: Mutex<Vec<u32>>,
    default_behavior: WorkerBehavior,
    behaviors: HashMap<u32, WorkerBehavior>,
    stand_in_program: String,
    stand_in_args: Vec<String>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    /// Create a launcher whose workers stay silent and exit immediately.
    pub fn new() -> Self {
        Self {
            launched: Mutex::new(Vec::new()),
            pids: Mutex::new(Vec::new()),
            default_behavior: WorkerBehavior::Silent,
            behaviors: HashMap::new(),
            stand_in_program: "true".to_string(),
            stand_in_args: Vec::new(),
        }
    }

    /// Create a launcher whose workers all report their address.
    pub fn cooperative() -> Self {
        Self {
            default_behavior: WorkerBehavior::ReportAddress,
            ..Self::new()
        }
    }

    /// Override the behavior of the worker with `index`.
    pub fn with_behavior(mut self, index: u32, behavior: WorkerBehavior) -> Self {
        self.behaviors.insert(index, behavior);
        self
    }

    /// Run `program args...` as the stand-in process (default: `true`).
    pub fn with_stand_in(mut self, program: &str, args: &[&str]) -> Self {
        self.stand_in_program = program.to_string();
        self.stand_in_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Address a simulated worker reports.
    pub fn address_for(index: u32) -> String {
        format!("pnp://10.0.0.{index}:64738/worker-{index}")
    }

    /// Commands launched so far (including failed launches).
    pub fn launched(&self) -> Vec<WorkerCommand> {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of launch calls so far.
    pub fn launch_count(&self) -> usize {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// PIDs of the stand-in processes started so far.
    pub fn pids(&self) -> Vec<u32> {
        self.pids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn behavior_for(&self, index: u32) -> &WorkerBehavior {
        self.behaviors.get(&index).unwrap_or(&self.default_behavior)
    }
}

async fn simulate_worker(port: u16, index: u32, behavior: WorkerBehavior) {
    let Ok(mut stream) = TcpStream::connect(("127.0.0.1", port)).await else {
        return;
    };
    let address = MockLauncher::address_for(index);

    match behavior {
        WorkerBehavior::ReportAddress => {
            let _ = stream
                .write_all(format!("{address}\n{END_OF_MESSAGE}").as_bytes())
                .await;
        }
        WorkerBehavior::ReportAddressSplit => {
            let _ = stream.write_all(format!("{address}\n").as_bytes()).await;
            let _ = stream.flush().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = stream.write_all(END_OF_MESSAGE.as_bytes()).await;
        }
        WorkerBehavior::EmptyThenClose | WorkerBehavior::Silent | WorkerBehavior::FailLaunch => {}
    }
    let _ = stream.shutdown().await;
}

impl Launcher for MockLauncher {
    fn launcher_type(&self) -> &'static str {
        "mock"
    }

    fn launch(&self, command: &WorkerCommand) -> Result<Child> {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command.clone());

        let behavior = self.behavior_for(command.index).clone();
        if behavior == WorkerBehavior::FailLaunch {
            return Err(LaunchError::StartFailed {
                index: command.index,
                reason: "Mock launch failure".to_string(),
            });
        }

        if let Some(port) = command.rendezvous_port
            && behavior != WorkerBehavior::Silent
        {
            tokio::spawn(simulate_worker(port, command.index, behavior));
        }

        let child = Command::new(&self.stand_in_program)
            .args(&self.stand_in_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(pid) = child.id() {
            self.pids
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(pid);
        }
        Ok(child)
    }
}
