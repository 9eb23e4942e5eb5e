// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! XenServer provider.
//!
//! Launch parameters live in the guest's xenstore subtree under `vm-data/`.

use async_trait::async_trait;

use crate::store::{GuestToolStore, KvStore, ToolDialect};

use super::Provider;

/// Provider for guests running on XenServer.
#[derive(Debug, Clone)]
pub struct XenServerProvider {
    store: GuestToolStore,
}

impl Default for XenServerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl XenServerProvider {
    /// Provider using the xenstore utilities from `PATH`.
    pub fn new() -> Self {
        Self {
            store: GuestToolStore::new(ToolDialect::xenstore()),
        }
    }

    /// Provider with a custom xenstore prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            store: GuestToolStore::new(ToolDialect::XenStore {
                read_tool: "xenstore-read".to_string(),
                write_tool: "xenstore-write".to_string(),
                prefix: prefix.into(),
            }),
        }
    }
}

#[async_trait]
impl Provider for XenServerProvider {
    fn name(&self) -> &'static str {
        "xenserver"
    }

    fn store(&self) -> &dyn KvStore {
        &self.store
    }
}
