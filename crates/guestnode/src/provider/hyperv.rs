// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hyper-V provider.
//!
//! Reads the host-to-guest KVP pool maintained by `hv_kvp_daemon` and
//! publishes worker addresses through the guest pool.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::store::kvp::DEFAULT_POOL_DIR;
use crate::store::{KvStore, KvpPoolStore};

use super::{Provider, probe_store};

/// Provider for guests running on Hyper-V.
#[derive(Debug, Clone)]
pub struct HyperVProvider {
    store: KvpPoolStore,
}

impl Default for HyperVProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperVProvider {
    /// Provider over the pools in `/var/lib/hyperv`.
    pub fn new() -> Self {
        Self::in_dir(DEFAULT_POOL_DIR)
    }

    /// Provider over the pools in `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            store: KvpPoolStore::in_dir(dir),
        }
    }
}

#[async_trait]
impl Provider for HyperVProvider {
    fn name(&self) -> &'static str {
        "hyperv"
    }

    fn store(&self) -> &dyn KvStore {
        &self.store
    }

    async fn probe(&self) -> bool {
        // Without the daemon's pool file this is not a Hyper-V guest
        match tokio::fs::try_exists(self.store.read_pool()).await {
            Ok(true) => probe_store(self.name(), &self.store).await,
            Ok(false) => false,
            Err(e) => {
                debug!(provider = self.name(), error = %e, "Cannot stat KVP pool");
                false
            }
        }
    }
}
