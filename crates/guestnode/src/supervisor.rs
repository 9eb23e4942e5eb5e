// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle supervision of workers and the rendezvous socket.
//!
//! The supervisor owns every spawned worker and the rendezvous server for
//! the duration of a run. Releasing it (explicitly through
//! [`LifecycleSupervisor::shutdown`] or implicitly on drop) terminates all
//! workers that are still running and closes the socket. Both happen at most
//! once, however many times cleanup is triggered.

use std::process::ExitStatus;

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::rendezvous::RendezvousServer;
use crate::spawner::WorkerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    Exited,
    Terminated,
}

#[derive(Debug)]
struct TrackedWorker {
    handle: WorkerHandle,
    state: WorkerState,
}

/// Exit of one worker observed by [`LifecycleSupervisor::wait_all`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerExit {
    /// Worker index.
    pub index: u32,
    /// Exit code, if the worker exited normally.
    pub code: Option<i32>,
    /// Whether the worker exited with status 0.
    pub success: bool,
    /// When the worker was started.
    pub started_at: DateTime<Utc>,
    /// When the exit was observed.
    pub exited_at: DateTime<Utc>,
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Workers sent a kill signal by this pass.
    pub terminated: usize,
    /// Workers found already exited by this pass.
    pub already_exited: usize,
    /// Whether this pass closed the rendezvous socket.
    pub socket_closed: bool,
}

/// Owner of all spawned workers and of the rendezvous socket.
#[derive(Debug, Default)]
pub struct LifecycleSupervisor {
    workers: Vec<TrackedWorker>,
    rendezvous: Option<RendezvousServer>,
}

impl LifecycleSupervisor {
    /// Create an empty supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a spawned worker.
    pub fn track(&mut self, handle: WorkerHandle) {
        debug!(index = handle.index, pid = ?handle.pid, "Tracking worker");
        self.workers.push(TrackedWorker {
            handle,
            state: WorkerState::Running,
        });
    }

    /// Take ownership of the rendezvous server.
    pub fn attach_rendezvous(&mut self, server: RendezvousServer) {
        self.rendezvous = Some(server);
    }

    /// Rendezvous server, while attached.
    pub fn rendezvous(&self) -> Option<&RendezvousServer> {
        self.rendezvous.as_ref()
    }

    /// Close the rendezvous socket. Returns `false` if nothing was open.
    pub fn close_rendezvous(&mut self) -> bool {
        match self.rendezvous.as_mut() {
            Some(server) => server.close(),
            None => false,
        }
    }

    /// Number of tracked workers.
    pub fn tracked(&self) -> usize {
        self.workers.len()
    }

    /// Number of tracked workers not yet exited or terminated.
    pub fn running(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.state == WorkerState::Running)
            .count()
    }

    /// Wait for every running worker to exit, in spawn order.
    ///
    /// A non-zero exit is logged and does not stop the wait.
    pub async fn wait_all(&mut self) -> Vec<WorkerExit> {
        let mut exits = Vec::new();

        for worker in self.workers.iter_mut() {
            if worker.state != WorkerState::Running {
                continue;
            }
            let index = worker.handle.index;
            let started_at = worker.handle.started_at;

            let (code, success) = match worker.handle.child.wait().await {
                Ok(status) => {
                    log_exit(index, &status);
                    (status.code(), status.success())
                }
                Err(e) => {
                    warn!(index, error = %e, "Failed to wait for worker");
                    (None, false)
                }
            };
            exits.push(WorkerExit {
                index,
                code,
                success,
                started_at,
                exited_at: Utc::now(),
            });
            worker.state = WorkerState::Exited;
        }

        exits
    }

    /// Terminate every running worker and close the socket.
    ///
    /// Safe to call any number of times; only the first call that finds a
    /// worker running signals it.
    pub fn shutdown(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for worker in self.workers.iter_mut() {
            if worker.state != WorkerState::Running {
                continue;
            }
            let index = worker.handle.index;

            match worker.handle.child.try_wait() {
                Ok(Some(status)) => {
                    log_exit(index, &status);
                    worker.state = WorkerState::Exited;
                    report.already_exited += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(index, error = %e, "Could not check worker status");
                }
            }

            if kill_worker(&mut worker.handle) {
                worker.state = WorkerState::Terminated;
                report.terminated += 1;
            } else {
                worker.state = WorkerState::Exited;
                report.already_exited += 1;
            }
        }

        report.socket_closed = self.close_rendezvous();

        if report != CleanupReport::default() {
            info!(
                terminated = report.terminated,
                already_exited = report.already_exited,
                socket_closed = report.socket_closed,
                "Cleanup finished"
            );
        }
        report
    }
}

impl Drop for LifecycleSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn log_exit(index: u32, status: &ExitStatus) {
    if status.success() {
        info!(index, "Worker exited");
    } else {
        warn!(index, status = %status, "Worker exited with failure");
    }
}

/// Send SIGKILL to a worker. Returns false if it was already gone.
fn kill_worker(handle: &mut WorkerHandle) -> bool {
    let Some(pid) = handle.child.id() else {
        // tokio clears the pid once the child has been reaped
        return false;
    };

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => {
            debug!(index = handle.index, pid, "Sent SIGKILL to worker");
            true
        }
        Err(nix::errno::Errno::ESRCH) => {
            debug!(index = handle.index, pid, "Worker already dead (ESRCH)");
            false
        }
        Err(e) => {
            warn!(index = handle.index, pid, error = %e, "SIGKILL failed, falling back to start_kill");
            match handle.child.start_kill() {
                Ok(()) => true,
                Err(e) => {
                    warn!(index = handle.index, error = %e, "Failed to terminate worker");
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendezvous::RendezvousConfig;
    use tokio::process::Command;

    // Only the supervisor may stop these; tokio's kill_on_drop stays off.
    fn sleeper(index: u32) -> WorkerHandle {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        WorkerHandle::new(index, child)
    }

    /// Running and not a zombie.
    fn is_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    fn exiting(index: u32, code: i32) -> WorkerHandle {
        let child = Command::new("sh")
            .arg("-c")
            .arg(format!("exit {code}"))
            .spawn()
            .unwrap();
        WorkerHandle::new(index, child)
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let mut supervisor = LifecycleSupervisor::new();
        supervisor.track(sleeper(1));
        supervisor.track(sleeper(2));
        supervisor.attach_rendezvous(RendezvousServer::bind(2, RendezvousConfig::default()).unwrap());

        let first = supervisor.shutdown();
        assert_eq!(first.terminated, 2);
        assert!(first.socket_closed);
        assert_eq!(supervisor.running(), 0);

        let second = supervisor.shutdown();
        assert_eq!(second, CleanupReport::default());
        assert!(!supervisor.rendezvous().unwrap().is_open());
    }

    #[tokio::test]
    async fn test_wait_all_tolerates_failures() {
        let mut supervisor = LifecycleSupervisor::new();
        supervisor.track(exiting(1, 0));
        supervisor.track(exiting(2, 3));
        supervisor.track(exiting(3, 0));

        let exits = supervisor.wait_all().await;
        let summary: Vec<(u32, Option<i32>)> = exits.iter().map(|e| (e.index, e.code)).collect();
        assert_eq!(summary, vec![(1, Some(0)), (2, Some(3)), (3, Some(0))]);
        assert!(!exits[1].success);
        assert!(exits.iter().all(|e| e.exited_at >= e.started_at));

        // nothing left to terminate
        assert_eq!(supervisor.shutdown().terminated, 0);
    }

    #[tokio::test]
    async fn test_shutdown_skips_exited_workers() {
        let mut supervisor = LifecycleSupervisor::new();
        let mut handle = exiting(1, 0);
        handle.child.wait().await.unwrap();
        supervisor.track(handle);
        supervisor.track(sleeper(2));

        let report = supervisor.shutdown();
        assert_eq!(report.terminated, 1);
        assert_eq!(report.already_exited, 1);
    }

    #[tokio::test]
    async fn test_drop_terminates_workers_and_closes_socket() {
        let first = sleeper(1);
        let second = sleeper(2);
        let pids = [first.pid.unwrap(), second.pid.unwrap()];
        let server = RendezvousServer::bind(2, RendezvousConfig::default()).unwrap();
        let port = server.port();
        {
            let mut supervisor = LifecycleSupervisor::new();
            supervisor.track(first);
            supervisor.track(second);
            supervisor.attach_rendezvous(server);
            assert!(pids.iter().all(|pid| is_alive(*pid)));
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        for pid in pids {
            assert!(!is_alive(pid), "worker {pid} survived supervisor drop");
        }
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }
}
