// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-through cache over a pluggable key/value backend.
//!
//! The backend contract is Redis-shaped (`get`/`set`/`set_ex`/`del` over
//! string payloads); [`MemoryKv`] is the in-process reference implementation.
//! [`read_through`] layers JSON serialization and the hit/miss protocol on
//! top: errors from the compute step are never cached.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::metrics::LedgerMetrics;
use crate::types::normalize_address;

/// Cursor key recording the last block the indexer fully processed.
pub const INDEXER_CURSOR_KEY: &str = "indexer:lastBlock";

pub fn balance_cache_key(fund: &str, investor: &str, chain_id: u64) -> String {
    format!(
        "balance-{}-{}-{}",
        normalize_address(fund),
        normalize_address(investor),
        chain_id
    )
}

pub fn metrics_cache_key(fund: &str, chain_id: u64) -> String {
    format!("metrics-{}-{}", normalize_address(fund), chain_id)
}

#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> LedgerResult<Option<String>>;
    /// Stores without expiry. The entry lives until overwritten or deleted.
    async fn set(&self, key: &str, value: &str) -> LedgerResult<()>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> LedgerResult<()>;
    async fn del(&self, key: &str) -> LedgerResult<()>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`KvCache`] with per-entry expiry, checked lazily on read.
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// (hits, misses) since construction. Expired entries count as misses.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvCache for MemoryKv {
    async fn get(&self, key: &str) -> LedgerResult<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
            }
        }
        // Expired. Drop the stale entry under the write lock.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> LedgerResult<()> {
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> LedgerResult<()> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> LedgerResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Returns the cached value under `key`, or computes, caches and returns a
/// fresh one. A zero `ttl` stores without expiry.
///
/// A cached payload that no longer deserializes is reported as corrupt rather
/// than silently recomputed, so schema drift shows up instead of hiding.
pub async fn read_through<T, F, Fut>(
    kv: &dyn KvCache,
    key: &str,
    ttl: Duration,
    metrics: &LedgerMetrics,
    label: &str,
    compute: F,
) -> LedgerResult<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    if let Some(raw) = kv.get(key).await? {
        metrics.cache_hits.with_label_values(&[label]).inc();
        debug!(key, "cache hit");
        return serde_json::from_str(&raw).map_err(|e| {
            LedgerError::Serialization(format!("corrupt cache entry for {key}: {e}"))
        });
    }
    metrics.cache_misses.with_label_values(&[label]).inc();
    debug!(key, "cache miss");
    let value = compute().await?;
    let raw = serde_json::to_string(&value)
        .map_err(|e| LedgerError::Serialization(format!("cache encode failed for {key}: {e}")))?;
    if ttl.is_zero() {
        kv.set(key, &raw).await?;
    } else {
        kv.set_ex(key, &raw, ttl).await?;
    }
    Ok(value)
}
