// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for guestnode integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use guestnode::launcher::MockLauncher;
use guestnode::orchestrator::Orchestrator;
use guestnode::provider::{ProviderRegistry, StaticProvider};
use guestnode::rendezvous::RendezvousConfig;
use guestnode::store::MemoryStore;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Rendezvous settings short enough for tests.
pub fn fast_rendezvous() -> RendezvousConfig {
    RendezvousConfig {
        accept_timeout: Duration::from_millis(500),
        recv_timeout: Duration::from_millis(500),
        accept_max_attempts: 2,
        recv_max_attempts: 2,
        buffer_size: 1024,
    }
}

/// Store holding the mandatory keys.
pub fn guest_store(holding_vm: &str, capacity: u32) -> MemoryStore {
    MemoryStore::with_pairs([
        ("holdingVM".to_string(), holding_vm.to_string()),
        ("hostCapacity".to_string(), capacity.to_string()),
        ("dynamic.0".to_string(), "-Dnode.tag=test".to_string()),
        ("dynamic.1".to_string(), "null".to_string()),
    ])
}

/// Orchestrator probing `providers` in order and launching through `launcher`.
pub fn orchestrator(providers: Vec<Arc<StaticProvider>>, launcher: Arc<MockLauncher>) -> Orchestrator {
    let mut registry = ProviderRegistry::new(Duration::from_millis(10));
    for provider in providers {
        registry.register(provider);
    }

    Orchestrator::builder()
        .registry(registry)
        .launcher(launcher)
        .worker_program("node-worker")
        .worker_args(vec!["--foreground".to_string()])
        .rendezvous(fast_rendezvous())
        .build()
        .expect("orchestrator")
}

/// Connect to `port` and send each part as a separate write.
pub async fn send_parts(port: u16, parts: &[&str]) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    for part in parts {
        stream.write_all(part.as_bytes()).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let _ = stream.shutdown().await;
}

/// Whether `pid` is running (zombies count as dead).
pub fn process_is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}
