// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider registry and probe polling.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Provider, ProviderKind};

/// Ordered list of providers probed until one matches.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
    poll_interval: Duration,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ProviderRegistry {
    /// Empty registry sleeping `poll_interval` between probe passes.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            providers: Vec::new(),
            poll_interval,
        }
    }

    /// Registry of the built-in providers for `kinds`, in that order.
    pub fn from_kinds(kinds: &[ProviderKind], poll_interval: Duration) -> Self {
        let mut registry = Self::new(poll_interval);
        for kind in kinds {
            registry.register(kind.build());
        }
        registry
    }

    /// Append a provider. Registering a name twice keeps the first one.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        if self.providers.iter().any(|p| p.name() == provider.name()) {
            debug!(provider = provider.name(), "Provider already registered");
        } else {
            self.providers.push(provider);
        }
        self
    }

    /// Registered provider names, in probing order.
    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Probe every provider once; first match wins.
    pub async fn resolve_once(&self) -> Option<Arc<dyn Provider>> {
        for provider in &self.providers {
            if provider.probe().await {
                return Some(provider.clone());
            }
            debug!(provider = provider.name(), "Provider did not match");
        }
        None
    }

    /// Probe until a provider matches, sleeping between passes.
    ///
    /// Guest tooling may not be up yet at boot, so this never gives up.
    pub async fn resolve(&self) -> Arc<dyn Provider> {
        if self.providers.is_empty() {
            warn!("No providers registered; probing will never succeed");
        }

        let mut passes: u64 = 0;
        loop {
            passes += 1;
            if let Some(provider) = self.resolve_once().await {
                info!(provider = provider.name(), passes, "Hypervisor detected");
                return provider;
            }
            if passes == 1 {
                info!(
                    providers = ?self.names(),
                    retry_in_secs = self.poll_interval.as_secs(),
                    "No hypervisor detected yet, will keep probing"
                );
            } else {
                debug!(passes, "No hypervisor detected");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;
    use crate::provider::mock::ProbeBehavior;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_first_match_in_order_wins() {
        let a = Arc::new(StaticProvider::unmatched("a"));
        let b = Arc::new(StaticProvider::matching("b", MemoryStore::new()));
        let c = Arc::new(StaticProvider::matching("c", MemoryStore::new()));

        let mut registry = ProviderRegistry::new(Duration::from_millis(10));
        registry.register(a.clone()).register(b.clone()).register(c.clone());

        let resolved = registry.resolve_once().await.unwrap();
        assert_eq!(resolved.name(), "b");
        assert_eq!(a.probe_count(), 1);
        assert_eq!(b.probe_count(), 1);
        assert_eq!(c.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_probe_moves_on() {
        let mut registry = ProviderRegistry::new(Duration::from_millis(10));
        registry
            .register(Arc::new(StaticProvider::new(
                "broken",
                ProbeBehavior::Fail,
                MemoryStore::new(),
            )))
            .register(Arc::new(StaticProvider::matching("ok", MemoryStore::new())));

        assert_eq!(registry.resolve().await.name(), "ok");
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_ignored() {
        let mut registry = ProviderRegistry::default();
        registry
            .register(Arc::new(StaticProvider::unmatched("x")))
            .register(Arc::new(StaticProvider::matching("x", MemoryStore::new())));
        assert_eq!(registry.names(), vec!["x"]);
        assert!(registry.resolve_once().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_keeps_polling() {
        let provider = Arc::new(StaticProvider::unmatched("late"));
        let mut registry = ProviderRegistry::new(Duration::from_secs(10));
        registry.register(provider.clone());

        let result = tokio::time::timeout(Duration::from_secs(35), registry.resolve()).await;
        assert!(result.is_err());
        // passes at t = 0, 10, 20, 30
        assert_eq!(provider.probe_count(), 4);
    }

    #[test]
    fn test_from_kinds_keeps_order() {
        let registry = ProviderRegistry::from_kinds(
            &[ProviderKind::HyperV, ProviderKind::Vmware],
            Duration::from_secs(1),
        );
        assert_eq!(registry.names(), vec!["hyperv", "vmware"]);
    }
}
