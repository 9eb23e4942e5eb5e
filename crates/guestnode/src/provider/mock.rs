// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Static provider for testing.
//!
//! Answers probes with a fixed verdict and serves launch parameters from a
//! [`MemoryStore`].

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::store::{KvStore, MemoryStore};

use super::Provider;

/// How a [`StaticProvider`] answers probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeBehavior {
    /// Report a match.
    Match,
    /// Report no match.
    NoMatch,
    /// Simulate a transport failure (reported as no match).
    Fail,
}

/// Provider with a fixed probe answer.
#[derive(Debug)]
pub struct StaticProvider {
    name: &'static str,
    behavior: ProbeBehavior,
    store: MemoryStore,
    probes: AtomicUsize,
}

impl StaticProvider {
    /// Provider that matches and serves `store`.
    pub fn matching(name: &'static str, store: MemoryStore) -> Self {
        Self::new(name, ProbeBehavior::Match, store)
    }

    /// Provider that never matches.
    pub fn unmatched(name: &'static str) -> Self {
        Self::new(name, ProbeBehavior::NoMatch, MemoryStore::new())
    }

    /// Provider with an explicit probe behavior.
    pub fn new(name: &'static str, behavior: ProbeBehavior, store: MemoryStore) -> Self {
        Self {
            name,
            behavior,
            store,
            probes: AtomicUsize::new(0),
        }
    }

    /// Backing store.
    pub fn memory(&self) -> &MemoryStore {
        &self.store
    }

    /// Number of probes answered so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn store(&self) -> &dyn KvStore {
        &self.store
    }

    async fn probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ProbeBehavior::Match => true,
            ProbeBehavior::NoMatch => false,
            ProbeBehavior::Fail => {
                debug!(provider = self.name, "Simulated probe failure, treating as unmatched");
                false
            }
        }
    }
}
