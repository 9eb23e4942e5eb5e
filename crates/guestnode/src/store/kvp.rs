// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hyper-V KVP pool files.
//!
//! On Linux guests the `hv_kvp_daemon` mirrors the Hyper-V key/value pairs
//! into flat files under `/var/lib/hyperv`. Each file is a sequence of
//! fixed-size records: a 512-byte key followed by a 2048-byte value, both
//! NUL padded. Pool 0 carries host-to-guest pairs, pool 1 carries pairs the
//! guest publishes back to the host.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{KvStore, Result, StoreError};

/// Size of the key field of a KVP record.
pub const KVP_KEY_SIZE: usize = 512;
/// Size of the value field of a KVP record.
pub const KVP_VALUE_SIZE: usize = 2048;
/// Size of a full KVP record.
pub const KVP_RECORD_SIZE: usize = KVP_KEY_SIZE + KVP_VALUE_SIZE;

/// Default directory of the KVP pool files.
pub const DEFAULT_POOL_DIR: &str = "/var/lib/hyperv";

/// [`KvStore`] reading the host pool and writing the guest pool.
#[derive(Debug, Clone)]
pub struct KvpPoolStore {
    read_pool: PathBuf,
    write_pool: PathBuf,
}

impl KvpPoolStore {
    /// Store over `.kvp_pool_0` / `.kvp_pool_1` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            read_pool: dir.join(".kvp_pool_0"),
            write_pool: dir.join(".kvp_pool_1"),
        }
    }

    /// Store over explicit pool files.
    pub fn new(read_pool: impl Into<PathBuf>, write_pool: impl Into<PathBuf>) -> Self {
        Self {
            read_pool: read_pool.into(),
            write_pool: write_pool.into(),
        }
    }

    /// Path of the host-to-guest pool.
    pub fn read_pool(&self) -> &Path {
        &self.read_pool
    }

    async fn load(path: &Path) -> Result<Vec<(String, String)>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => decode_records(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[async_trait]
impl KvStore for KvpPoolStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let records = Self::load(&self.read_pool).await?;
        // The daemon may append an updated record without removing the old one.
        Ok(records
            .into_iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut records = Self::load(&self.write_pool).await?;
        match records.iter_mut().find(|(k, _)| k == key) {
            Some(record) => record.1 = value.to_string(),
            None => records.push((key.to_string(), value.to_string())),
        }

        let bytes = encode_records(&records)?;
        tokio::fs::write(&self.write_pool, bytes).await?;
        debug!(pool = %self.write_pool.display(), key = %key, "KVP record written");
        Ok(())
    }
}

/// Decode a pool file into `(key, value)` pairs, in file order.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<(String, String)>> {
    if bytes.len() % KVP_RECORD_SIZE != 0 {
        return Err(StoreError::Malformed(format!(
            "pool size {} is not a multiple of {}",
            bytes.len(),
            KVP_RECORD_SIZE
        )));
    }

    Ok(bytes
        .chunks_exact(KVP_RECORD_SIZE)
        .map(|record| {
            let (key, value) = record.split_at(KVP_KEY_SIZE);
            (field_to_string(key), field_to_string(value))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect())
}

/// Encode `(key, value)` pairs into fixed-size records.
pub fn encode_records(records: &[(String, String)]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(records.len() * KVP_RECORD_SIZE);
    for (key, value) in records {
        push_field(&mut out, key, KVP_KEY_SIZE)?;
        push_field(&mut out, value, KVP_VALUE_SIZE)?;
    }
    Ok(out)
}

fn field_to_string(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn push_field(out: &mut Vec<u8>, text: &str, size: usize) -> Result<()> {
    let bytes = text.as_bytes();
    // keep room for the terminating NUL the daemon expects
    if bytes.len() >= size {
        return Err(StoreError::Malformed(format!(
            "field of {} bytes does not fit a {size}-byte KVP slot",
            bytes.len()
        )));
    }
    out.extend_from_slice(bytes);
    out.resize(out.len() + size - bytes.len(), 0);
    Ok(())
}
