// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launch configuration extraction.
//!
//! The host pushes the launch parameters of a guest into its key/value
//! store before powering it on:
//!
//! | Key | Required | Meaning |
//! |-----|----------|---------|
//! | `holdingVM` | Yes | identifier of this guest |
//! | `hostCapacity` | Yes | number of workers to start (>= 1) |
//! | `dynamic.<n>` | No | extra launch flags, terminated by `"null"` |
//! | `rmUrl` | No | coordinator URL; selects pre-registered mode |
//! | `credentials` | No | coordinator credentials |
//! | `nodesource` | No | node source the workers join |

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{KvStore, StoreError};

/// Key holding the guest identifier.
pub const HOLDING_VM_KEY: &str = "holdingVM";
/// Key holding the number of workers.
pub const HOST_CAPACITY_KEY: &str = "hostCapacity";
/// Prefix of the indexed dynamic property keys.
pub const DYNAMIC_KEY_PREFIX: &str = "dynamic.";
/// Value terminating the dynamic property scan.
pub const DYNAMIC_SENTINEL: &str = "null";
/// Key holding the coordinator URL.
pub const COORDINATOR_URL_KEY: &str = "rmUrl";
/// Key holding the coordinator credentials.
pub const CREDENTIALS_KEY: &str = "credentials";
/// Key holding the node source name.
pub const NODE_SOURCE_KEY: &str = "nodesource";
/// Prefix of the keys receiving worker addresses.
pub const NODE_URL_KEY_PREFIX: &str = "nodeUrl.";
/// Default cap on dynamic property lookups.
pub const DEFAULT_DYNAMIC_SCAN_LIMIT: usize = 10_000;

/// Fatal problem with the launch parameters found in the guest store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// A required key is not set.
    #[error("Required key {0} is not set in the guest store")]
    MissingKey(&'static str),

    /// `hostCapacity` is not an integer >= 1.
    #[error("Invalid hostCapacity {0:?}: expected an integer >= 1")]
    InvalidHostCapacity(String),

    /// A required key could not be read.
    #[error("Failed to read required key {key}: {source}")]
    Store {
        /// Key being read.
        key: &'static str,
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },
}

/// Coordinator the workers register with directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCoordinator {
    /// Coordinator URL (contains a scheme separator).
    pub coordinator_url: String,
    /// Opaque credentials blob.
    pub credentials: String,
    /// Node source the workers join.
    pub node_source: String,
}

/// Launch parameters of this guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Identifier of the guest instance.
    pub holding_vm: String,
    /// Number of workers to spawn.
    pub host_capacity: u32,
    /// Extra launch flags, in key order.
    pub dynamic_properties: Vec<String>,
    /// Present in pre-registered mode, absent in rendezvous mode.
    pub remote: Option<RemoteCoordinator>,
}

impl RuntimeConfig {
    /// Whether workers register with the coordinator by themselves.
    pub fn is_pre_registered(&self) -> bool {
        self.remote.is_some()
    }
}

/// Lazy scan over `dynamic.0`, `dynamic.1`, ...
///
/// Ends at the `"null"` sentinel, at the first unset key, at the first read
/// failure, or after `limit` lookups, whichever comes first.
pub struct DynamicProperties<'a> {
    store: &'a dyn KvStore,
    next_index: usize,
    limit: usize,
    done: bool,
}

impl<'a> DynamicProperties<'a> {
    /// Start a scan over `store` with at most `limit` lookups.
    pub fn new(store: &'a dyn KvStore, limit: usize) -> Self {
        Self {
            store,
            next_index: 0,
            limit,
            done: false,
        }
    }

    /// Number of lookups performed so far.
    pub fn lookups(&self) -> usize {
        self.next_index
    }

    /// Fetch the next property, or `None` once the scan is over.
    pub async fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        if self.next_index >= self.limit {
            warn!(
                limit = self.limit,
                "Dynamic property scan hit its limit before the sentinel"
            );
            self.done = true;
            return None;
        }

        let key = format!("{DYNAMIC_KEY_PREFIX}{}", self.next_index);
        self.next_index += 1;

        match self.store.get(&key).await {
            Ok(Some(value)) if value != DYNAMIC_SENTINEL => Some(value),
            Ok(Some(_)) => {
                self.done = true;
                None
            }
            Ok(None) => {
                debug!(key = %key, "Dynamic property unset, ending scan");
                self.done = true;
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read dynamic property, ending scan");
                self.done = true;
                None
            }
        }
    }

    /// Drain the scan into a vector.
    pub async fn collect(mut self) -> Vec<String> {
        let mut properties = Vec::new();
        while let Some(property) = self.next().await {
            properties.push(property);
        }
        properties
    }
}

async fn required(store: &dyn KvStore, key: &'static str) -> Result<String, ConfigurationError> {
    match store.get(key).await {
        Ok(Some(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Ok(_) => Err(ConfigurationError::MissingKey(key)),
        Err(source) => Err(ConfigurationError::Store { key, source }),
    }
}

async fn optional(store: &dyn KvStore, key: &str) -> Option<String> {
    match store.get(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to read optional key");
            None
        }
    }
}

fn parse_host_capacity(raw: &str) -> Result<u32, ConfigurationError> {
    match raw.parse::<u32>() {
        Ok(capacity) if capacity >= 1 => Ok(capacity),
        _ => Err(ConfigurationError::InvalidHostCapacity(raw.to_string())),
    }
}

/// Read the launch parameters of this guest from `store`.
pub async fn extract_config(
    store: &dyn KvStore,
    dynamic_scan_limit: usize,
) -> Result<RuntimeConfig, ConfigurationError> {
    let holding_vm = required(store, HOLDING_VM_KEY).await?;
    let host_capacity = parse_host_capacity(&required(store, HOST_CAPACITY_KEY).await?)?;

    let dynamic_properties = DynamicProperties::new(store, dynamic_scan_limit)
        .collect()
        .await;

    let remote = match optional(store, COORDINATOR_URL_KEY).await {
        Some(url) if url.contains("://") => {
            let credentials = optional(store, CREDENTIALS_KEY).await.unwrap_or_default();
            let node_source = optional(store, NODE_SOURCE_KEY).await.unwrap_or_default();
            Some(RemoteCoordinator {
                coordinator_url: url.trim().to_string(),
                credentials,
                node_source,
            })
        }
        Some(url) => {
            debug!(value = %url, "Coordinator key holds no URL, using rendezvous mode");
            None
        }
        None => None,
    };

    info!(
        holding_vm = %holding_vm,
        host_capacity = host_capacity,
        dynamic_properties = dynamic_properties.len(),
        pre_registered = remote.is_some(),
        "Extracted launch configuration"
    );

    Ok(RuntimeConfig {
        holding_vm,
        host_capacity,
        dynamic_properties,
        remote,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn base_store() -> MemoryStore {
        MemoryStore::with_pairs([(HOLDING_VM_KEY, "vm-1"), (HOST_CAPACITY_KEY, "2")])
    }

    #[tokio::test]
    async fn test_dynamic_scan_stops_at_sentinel() {
        let store = MemoryStore::with_pairs([
            ("dynamic.0", "a"),
            ("dynamic.1", "b"),
            ("dynamic.2", "null"),
            ("dynamic.3", "never-read"),
        ]);

        let mut scan = DynamicProperties::new(&store, DEFAULT_DYNAMIC_SCAN_LIMIT);
        let mut seen = Vec::new();
        while let Some(p) = scan.next().await {
            seen.push(p);
        }

        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(scan.lookups(), 3);
        assert_eq!(store.lookup_count(DYNAMIC_KEY_PREFIX), 3);
    }

    #[tokio::test]
    async fn test_dynamic_scan_respects_limit() {
        let store = MemoryStore::new();
        for i in 0..50 {
            store.insert(format!("dynamic.{i}"), "-Dx=y");
        }

        let properties = DynamicProperties::new(&store, 10).collect().await;
        assert_eq!(properties.len(), 10);
        assert_eq!(store.lookup_count(DYNAMIC_KEY_PREFIX), 10);
    }

    #[tokio::test]
    async fn test_dynamic_scan_ends_on_unset_key() {
        let store = MemoryStore::with_pairs([("dynamic.0", "-Da=1")]);
        let properties = DynamicProperties::new(&store, 100).collect().await;
        assert_eq!(properties, vec!["-Da=1"]);
        assert_eq!(store.lookup_count(DYNAMIC_KEY_PREFIX), 2);
    }

    #[tokio::test]
    async fn test_missing_holding_vm() {
        let store = MemoryStore::with_pairs([(HOST_CAPACITY_KEY, "2")]);
        let err = extract_config(&store, 10).await.unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingKey(HOLDING_VM_KEY)));
    }

    #[tokio::test]
    async fn test_missing_host_capacity() {
        let store = MemoryStore::with_pairs([(HOLDING_VM_KEY, "vm-1")]);
        let err = extract_config(&store, 10).await.unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingKey(HOST_CAPACITY_KEY)));
    }

    #[tokio::test]
    async fn test_invalid_host_capacity() {
        for raw in ["0", "-1", "two"] {
            let store = MemoryStore::with_pairs([(HOLDING_VM_KEY, "vm-1"), (HOST_CAPACITY_KEY, raw)]);
            let err = extract_config(&store, 10).await.unwrap_err();
            assert!(
                matches!(err, ConfigurationError::InvalidHostCapacity(_)),
                "{raw} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_store_failure_on_required_key() {
        let store = base_store();
        store.fail_on(HOLDING_VM_KEY);
        let err = extract_config(&store, 10).await.unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::Store {
                key: HOLDING_VM_KEY,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_rendezvous_mode_without_url() {
        let store = base_store();
        store.insert("dynamic.0", "null");
        let config = extract_config(&store, 10).await.unwrap();

        assert_eq!(config.holding_vm, "vm-1");
        assert_eq!(config.host_capacity, 2);
        assert!(config.dynamic_properties.is_empty());
        assert!(!config.is_pre_registered());
    }

    #[tokio::test]
    async fn test_url_without_scheme_selects_rendezvous() {
        let store = base_store();
        store.insert(COORDINATOR_URL_KEY, "null");
        let config = extract_config(&store, 10).await.unwrap();
        assert!(config.remote.is_none());
        // credentials are only read once a URL is accepted
        assert_eq!(store.lookup_count(CREDENTIALS_KEY), 0);
    }

    #[tokio::test]
    async fn test_pre_registered_mode() {
        let store = base_store();
        store.insert(COORDINATOR_URL_KEY, "pnp://rm.example:64738/");
        store.insert(CREDENTIALS_KEY, "c3VwZXJzZWNyZXQ=");
        store.insert(NODE_SOURCE_KEY, "virtual-ns");

        let config = extract_config(&store, 10).await.unwrap();
        assert_eq!(
            config.remote,
            Some(RemoteCoordinator {
                coordinator_url: "pnp://rm.example:64738/".to_string(),
                credentials: "c3VwZXJzZWNyZXQ=".to_string(),
                node_source: "virtual-ns".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_malformed_url_with_scheme_is_accepted() {
        let store = base_store();
        store.insert(COORDINATOR_URL_KEY, "://");
        let config = extract_config(&store, 10).await.unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(remote.coordinator_url, "://");
        assert_eq!(remote.credentials, "");
    }
}
