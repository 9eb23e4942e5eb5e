// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bootstrap orchestration.
//!
//! [`Orchestrator::run`] drives one bootstrap of this guest:
//!
//! ```text
//! probe providers ─► extract config ─┬─ rmUrl set ──► spawn (pre-registered) ─────────────┐
//!                                    └─ no rmUrl ──► bind rendezvous ─► spawn ─► collect ─┤
//!                                                     ─► close socket ─► write back ─────┤
//!                                                                                         ▼
//!                                                                   wait for workers ─► cleanup
//! ```
//!
//! All state of a run (workers, socket) lives in a [`LifecycleSupervisor`]
//! created inside `run`, so an early return or a dropped `run` future
//! releases everything.

use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::extract::DEFAULT_DYNAMIC_SCAN_LIMIT;
use crate::launcher::Launcher;
use crate::provider::{Provider, ProviderRegistry};
use crate::rendezvous::{RendezvousConfig, RendezvousServer};
use crate::spawner::{LaunchMode, WorkerSpawner};
use crate::supervisor::{LifecycleSupervisor, WorkerExit};

/// Outcome of a bootstrap run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Provider that matched.
    pub provider: &'static str,
    /// Identifier of this guest.
    pub holding_vm: String,
    /// `pre_registered` or `rendezvous`.
    pub mode: &'static str,
    /// Workers requested by `hostCapacity`.
    pub requested: u32,
    /// Workers actually started.
    pub spawned: usize,
    /// Workers that failed to start.
    pub spawn_failures: usize,
    /// Addresses collected by the rendezvous server.
    pub addresses_collected: usize,
    /// Addresses written back to the store.
    pub addresses_written: usize,
    /// Exit of every worker, in spawn order.
    pub exits: Vec<WorkerExit>,
}

/// Builder for creating an [`Orchestrator`].
pub struct OrchestratorBuilder {
    registry: Option<ProviderRegistry>,
    launcher: Option<Arc<dyn Launcher>>,
    worker_program: String,
    worker_args: Vec<String>,
    rendezvous: RendezvousConfig,
    dynamic_scan_limit: usize,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            launcher: None,
            worker_program: "java".to_string(),
            worker_args: Vec::new(),
            rendezvous: RendezvousConfig::default(),
            dynamic_scan_limit: DEFAULT_DYNAMIC_SCAN_LIMIT,
        }
    }
}

impl OrchestratorBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-filled from process configuration.
    ///
    /// The registry is built from `config.providers`; only the launcher
    /// remains to be set.
    pub fn from_config(config: &Config) -> Self {
        Self {
            registry: Some(ProviderRegistry::from_kinds(
                &config.providers,
                config.probe_interval,
            )),
            launcher: None,
            worker_program: config.worker_program.clone(),
            worker_args: config.worker_args.clone(),
            rendezvous: config.rendezvous.clone(),
            dynamic_scan_limit: config.dynamic_scan_limit,
        }
    }

    /// Set the provider registry (required).
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the worker launcher (required).
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Set the worker executable.
    ///
    /// Default: `java`
    pub fn worker_program(mut self, program: impl Into<String>) -> Self {
        self.worker_program = program.into();
        self
    }

    /// Set the fixed worker arguments.
    pub fn worker_args(mut self, args: Vec<String>) -> Self {
        self.worker_args = args;
        self
    }

    /// Set rendezvous timeouts and circuit breakers.
    pub fn rendezvous(mut self, config: RendezvousConfig) -> Self {
        self.rendezvous = config;
        self
    }

    /// Set the cap on dynamic property lookups.
    ///
    /// Default: 10 000
    pub fn dynamic_scan_limit(mut self, limit: usize) -> Self {
        self.dynamic_scan_limit = limit;
        self
    }

    /// Build the orchestrator.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> anyhow::Result<Orchestrator> {
        let registry = self
            .registry
            .ok_or_else(|| anyhow!("registry is required"))?;
        let launcher = self
            .launcher
            .ok_or_else(|| anyhow!("launcher is required"))?;

        Ok(Orchestrator {
            registry,
            spawner: WorkerSpawner::new(launcher, self.worker_program, self.worker_args),
            rendezvous: self.rendezvous,
            dynamic_scan_limit: self.dynamic_scan_limit,
        })
    }
}

/// Drives one bootstrap of the guest.
pub struct Orchestrator {
    registry: ProviderRegistry,
    spawner: WorkerSpawner,
    rendezvous: RendezvousConfig,
    dynamic_scan_limit: usize,
}

impl Orchestrator {
    /// Create a new builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Run the bootstrap to completion.
    ///
    /// Fails only on configuration problems, before any worker is spawned.
    /// Everything past that point degrades gracefully.
    pub async fn run(&self) -> Result<RunSummary> {
        let provider = self.registry.resolve().await;
        let config = provider.extract_config(self.dynamic_scan_limit).await?;

        let mut supervisor = LifecycleSupervisor::new();

        let mode = match &config.remote {
            Some(remote) => LaunchMode::PreRegistered(remote.clone()),
            None => {
                let server = RendezvousServer::bind(config.host_capacity, self.rendezvous.clone())?;
                let port = server.port();
                supervisor.attach_rendezvous(server);
                LaunchMode::Rendezvous { port }
            }
        };

        info!(
            provider = provider.name(),
            holding_vm = %config.holding_vm,
            mode = mode.name(),
            workers = config.host_capacity,
            "Starting workers"
        );

        let outcome = provider.spawn_workers(&config, &self.spawner, &mode).await;
        let spawned = outcome.handles.len();
        let spawn_failures = outcome.failures;
        for handle in outcome.handles {
            supervisor.track(handle);
        }

        let mut addresses_collected = 0;
        let mut addresses_written = 0;

        if let LaunchMode::Rendezvous { .. } = mode {
            // Workers that never started will never call back
            let expected = spawned as u32;
            let addresses = match supervisor.rendezvous() {
                Some(server) if expected > 0 => server.collect(expected).await,
                _ => Vec::new(),
            };
            supervisor.close_rendezvous();

            addresses_collected = addresses.len();
            addresses_written = write_back_addresses(provider.as_ref(), &addresses).await;
        }

        let exits = supervisor.wait_all().await;
        supervisor.shutdown();

        let summary = RunSummary {
            provider: provider.name(),
            holding_vm: config.holding_vm,
            mode: mode.name(),
            requested: config.host_capacity,
            spawned,
            spawn_failures,
            addresses_collected,
            addresses_written,
            exits,
        };

        info!(
            provider = summary.provider,
            spawned = summary.spawned,
            spawn_failures = summary.spawn_failures,
            addresses_written = summary.addresses_written,
            "Bootstrap finished"
        );

        Ok(summary)
    }
}

/// Write `addresses` as `nodeUrl.0`, `nodeUrl.1`, ... in collection order.
///
/// Returns the number of successful writes; failures are logged.
pub async fn write_back_addresses(provider: &dyn Provider, addresses: &[String]) -> usize {
    let mut written = 0;
    for (index, address) in addresses.iter().enumerate() {
        match provider.write_back_address(index, address).await {
            Ok(()) => {
                info!(provider = provider.name(), index, address = %address, "Published worker address");
                written += 1;
            }
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    index,
                    error = %e,
                    "Failed to publish worker address"
                );
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::MockLauncher;
    use crate::provider::StaticProvider;
    use crate::store::MemoryStore;

    #[test]
    fn test_builder_requires_registry_and_launcher() {
        let err = Orchestrator::builder().build().err().unwrap();
        assert!(err.to_string().contains("registry"));

        let err = Orchestrator::builder()
            .registry(ProviderRegistry::default())
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("launcher"));
    }

    #[test]
    fn test_builder_from_config() {
        let config = Config::default();
        let orchestrator = OrchestratorBuilder::from_config(&config)
            .launcher(Arc::new(MockLauncher::new()))
            .build()
            .unwrap();
        assert_eq!(
            orchestrator.registry.names(),
            vec!["vmware", "virtualbox", "xenserver", "hyperv"]
        );
    }

    #[tokio::test]
    async fn test_write_back_continues_after_failure() {
        let store = MemoryStore::new();
        store.fail_on("nodeUrl.1");
        let provider = StaticProvider::matching("p", store);

        let addresses = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let written = write_back_addresses(&provider, &addresses).await;

        assert_eq!(written, 2);
        assert_eq!(provider.memory().value("nodeUrl.0").as_deref(), Some("a"));
        assert!(provider.memory().value("nodeUrl.1").is_none());
        assert_eq!(provider.memory().value("nodeUrl.2").as_deref(), Some("c"));
    }
}
