// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Guestnode - Compute Node Bootstrap
//!
//! Runs once per guest boot:
//! - Detects the hosting hypervisor
//! - Reads launch parameters from the guest store
//! - Starts the workers and reports their addresses when needed
//! - Stays alive until every worker has exited

use std::sync::Arc;

use tracing::{info, warn};

use guestnode::config::Config;
use guestnode::launcher::ProcessLauncher;
use guestnode::orchestrator::OrchestratorBuilder;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guestnode=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        worker_program = %config.worker_program,
        providers = ?config.providers,
        probe_interval_secs = config.probe_interval.as_secs(),
        "Starting guestnode"
    );

    let orchestrator = OrchestratorBuilder::from_config(&config)
        .launcher(Arc::new(ProcessLauncher::new()))
        .build()?;

    // Dropping the run future on a signal releases workers and socket
    tokio::select! {
        result = orchestrator.run() => {
            let summary = result?;
            info!(summary = %serde_json::to_string(&summary)?, "All workers exited");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, workers terminated");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
