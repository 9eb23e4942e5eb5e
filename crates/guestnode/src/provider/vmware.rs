// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! VMware provider.
//!
//! Launch parameters arrive as `guestinfo.*` variables set in the VM's
//! configuration and are read with `vmware-rpctool` from VMware Tools.

use async_trait::async_trait;

use crate::store::{GuestToolStore, KvStore, ToolDialect};

use super::Provider;

/// Provider for guests running on VMware hypervisors.
#[derive(Debug, Clone)]
pub struct VmwareProvider {
    store: GuestToolStore,
}

impl Default for VmwareProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VmwareProvider {
    /// Provider using `vmware-rpctool` from `PATH`.
    pub fn new() -> Self {
        Self {
            store: GuestToolStore::new(ToolDialect::vmware()),
        }
    }

    /// Provider using an explicit `vmware-rpctool` path.
    pub fn with_tool(tool: impl Into<String>) -> Self {
        Self {
            store: GuestToolStore::new(ToolDialect::VmwareRpc { tool: tool.into() }),
        }
    }
}

#[async_trait]
impl Provider for VmwareProvider {
    fn name(&self) -> &'static str {
        "vmware"
    }

    fn store(&self) -> &dyn KvStore {
        &self.store
    }
}
