// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store for testing.
//!
//! Keeps pairs in a map and records every key that was read, so tests can
//! assert on lookup counts as well as on content.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{KvStore, Result, StoreError};

/// In-memory [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    lookups: Mutex<Vec<String>>,
    failing_keys: Mutex<HashSet<String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `pairs`.
    pub fn with_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut values = store.values.lock().unwrap_or_else(|e| e.into_inner());
            for (k, v) in pairs {
                values.insert(k.into(), v.into());
            }
        }
        store
    }

    /// Insert or replace a pair without recording a lookup.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
    }

    /// Make every operation on `key` fail with a transport error.
    pub fn fail_on(&self, key: impl Into<String>) {
        self.failing_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into());
    }

    /// Current value of `key`, without recording a lookup.
    pub fn value(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Keys read so far, in order.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of reads of keys starting with `prefix`.
    pub fn lookup_count(&self, prefix: &str) -> usize {
        self.lookups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    fn check_failure(&self, key: &str) -> Result<()> {
        if self
            .failing_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
        {
            return Err(StoreError::Other(format!("simulated failure for {key}")));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.lookups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.to_string());
        self.check_failure(key)?;
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_failure(key)?;
        self.insert(key, value);
        Ok(())
    }
}
