// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hypervisor providers.
//!
//! A provider knows how to tell whether the guest is hosted by its
//! hypervisor family and how to reach that hypervisor's key/value store.
//! Everything else (config extraction, spawning, address write-back) is
//! shared behaviour expressed as default methods of [`Provider`].
//!
//! | Provider | Store backend |
//! |----------|---------------|
//! | `vmware` | `vmware-rpctool` guestinfo variables |
//! | `virtualbox` | `VBoxControl` guest properties |
//! | `xenserver` | `xenstore-read` / `xenstore-write` |
//! | `hyperv` | KVP pool files under `/var/lib/hyperv` |

pub mod hyperv;
pub mod mock;
pub mod registry;
pub mod virtualbox;
pub mod vmware;
pub mod xenserver;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::extract::{self, ConfigurationError, HOLDING_VM_KEY, NODE_URL_KEY_PREFIX, RuntimeConfig};
use crate::spawner::{LaunchMode, SpawnOutcome, WorkerSpawner};
use crate::store::{KvStore, StoreError};

pub use hyperv::HyperVProvider;
pub use mock::StaticProvider;
pub use registry::ProviderRegistry;
pub use virtualbox::VirtualBoxProvider;
pub use vmware::VmwareProvider;
pub use xenserver::XenServerProvider;

/// Trait for hypervisor providers.
///
/// Implementations only have to name themselves and expose their store;
/// the default methods cover the rest and may be overridden where a
/// hypervisor needs something different.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier (e.g., "vmware", "xenserver")
    fn name(&self) -> &'static str;

    /// Guest key/value store of this hypervisor.
    fn store(&self) -> &dyn KvStore;

    /// Whether this hypervisor is hosting the guest.
    ///
    /// Never fails: transport errors count as "not matched".
    async fn probe(&self) -> bool {
        probe_store(self.name(), self.store()).await
    }

    /// Read the launch parameters from the store.
    async fn extract_config(
        &self,
        dynamic_scan_limit: usize,
    ) -> Result<RuntimeConfig, ConfigurationError> {
        extract::extract_config(self.store(), dynamic_scan_limit).await
    }

    /// Start the workers described by `config`.
    async fn spawn_workers(
        &self,
        config: &RuntimeConfig,
        spawner: &WorkerSpawner,
        mode: &LaunchMode,
    ) -> SpawnOutcome {
        spawner.spawn_all(config, mode)
    }

    /// Publish the address of worker `index` as `nodeUrl.<index>`.
    async fn write_back_address(&self, index: usize, address: &str) -> Result<(), StoreError> {
        self.store()
            .set(&format!("{NODE_URL_KEY_PREFIX}{index}"), address)
            .await
    }
}

/// Probe by reading `holdingVM`: the host always sets it before boot.
pub async fn probe_store(name: &str, store: &dyn KvStore) -> bool {
    match store.get(HOLDING_VM_KEY).await {
        Ok(Some(value)) => !value.trim().is_empty(),
        Ok(None) => false,
        Err(e) => {
            debug!(provider = name, error = %e, "Probe failed, treating as unmatched");
            false
        }
    }
}

/// Known provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// VMware ESX / Workstation.
    Vmware,
    /// Oracle VirtualBox.
    VirtualBox,
    /// Citrix XenServer / Xen.
    XenServer,
    /// Microsoft Hyper-V.
    HyperV,
}

impl ProviderKind {
    /// All families, in default probing order.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Vmware,
        ProviderKind::VirtualBox,
        ProviderKind::XenServer,
        ProviderKind::HyperV,
    ];

    /// Identifier used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vmware => "vmware",
            Self::VirtualBox => "virtualbox",
            Self::XenServer => "xenserver",
            Self::HyperV => "hyperv",
        }
    }

    /// Provider with default tool locations.
    pub fn build(&self) -> Arc<dyn Provider> {
        match self {
            Self::Vmware => Arc::new(VmwareProvider::new()),
            Self::VirtualBox => Arc::new(VirtualBoxProvider::new()),
            Self::XenServer => Arc::new(XenServerProvider::new()),
            Self::HyperV => Arc::new(HyperVProvider::new()),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vmware" => Ok(Self::Vmware),
            "virtualbox" | "vbox" => Ok(Self::VirtualBox),
            "xenserver" | "xen" => Ok(Self::XenServer),
            "hyperv" | "hyper-v" => Ok(Self::HyperV),
            _ => Err(s.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("VMware".parse::<ProviderKind>(), Ok(ProviderKind::Vmware));
        assert_eq!("xen".parse::<ProviderKind>(), Ok(ProviderKind::XenServer));
        assert_eq!("hyper-v".parse::<ProviderKind>(), Ok(ProviderKind::HyperV));
        assert_eq!("qemu".parse::<ProviderKind>(), Err("qemu".to_string()));
    }

    #[test]
    fn test_build_names_match_kind() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.build().name(), kind.as_str());
        }
    }

    #[tokio::test]
    async fn test_probe_store_swallows_errors() {
        let store = MemoryStore::with_pairs([(HOLDING_VM_KEY, "vm-1")]);
        assert!(probe_store("test", &store).await);

        store.fail_on(HOLDING_VM_KEY);
        assert!(!probe_store("test", &store).await);

        let empty = MemoryStore::new();
        assert!(!probe_store("test", &empty).await);
    }

    #[tokio::test]
    async fn test_write_back_sets_node_url() {
        let provider = StaticProvider::matching("p", MemoryStore::new());
        provider
            .write_back_address(3, "pnp://10.0.0.3:64738/w")
            .await
            .unwrap();
        assert_eq!(
            provider.memory().value("nodeUrl.3").as_deref(),
            Some("pnp://10.0.0.3:64738/w")
        );
    }
}
