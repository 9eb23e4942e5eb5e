// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! VirtualBox provider.
//!
//! Launch parameters are guest properties under `/guestnode/`, read and
//! written with `VBoxControl` from the Guest Additions.

use async_trait::async_trait;

use crate::store::{GuestToolStore, KvStore, ToolDialect};

use super::Provider;

/// Provider for guests running on VirtualBox.
#[derive(Debug, Clone)]
pub struct VirtualBoxProvider {
    store: GuestToolStore,
}

impl Default for VirtualBoxProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualBoxProvider {
    /// Provider using `VBoxControl` from `PATH` and the `/guestnode/` prefix.
    pub fn new() -> Self {
        Self {
            store: GuestToolStore::new(ToolDialect::virtualbox()),
        }
    }

    /// Provider with an explicit tool path and property prefix.
    pub fn with_tool(tool: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store: GuestToolStore::new(ToolDialect::VBoxControl {
                tool: tool.into(),
                prefix: prefix.into(),
            }),
        }
    }
}

#[async_trait]
impl Provider for VirtualBoxProvider {
    fn name(&self) -> &'static str {
        "virtualbox"
    }

    fn store(&self) -> &dyn KvStore {
        &self.store
    }
}
