//! Tool-result cache with TTL expiry and single-flight coalescing.
//!
//! Keys incorporate the caller's access-scope hash, so two callers with
//! different scopes never observe each other's results. Concurrent misses
//! on one key are coalesced: callers take the key's lock, re-check the
//! cache, and only the first performs the outbound dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;

/// Compose the cache key for one tool call.
///
/// `arg_hash` and `scope_hash` are canonical SHA-256 hashes (see
/// `maestro_domain::hash`).
pub fn cache_key(provider_id: &str, tool_name: &str, arg_hash: &str, scope_hash: &str) -> String {
    format!("{provider_id}:{tool_name}:{arg_hash}:{scope_hash}")
}

struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }
}

/// Concurrency-safe TTL cache for successful tool results.
#[derive(Default)]
pub struct ToolCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Per-key locks for single-flight; idle locks are pruned lazily.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an unexpired entry, returning the value and its age.
    /// Expired entries are evicted on the spot.
    pub fn get(&self, key: &str) -> Option<(Value, Duration)> {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(key) {
                if !entry.is_expired() {
                    return Some((entry.value.clone(), entry.stored_at.elapsed()));
                }
            } else {
                return None;
            }
        }
        // Entry exists but is stale; take the write lock to evict.
        self.entries.write().remove(key);
        None
    }

    pub fn put(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.entries.write().insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Acquire the single-flight lock for a key.
    ///
    /// The caller holds the returned guard across its check-dispatch-store
    /// sequence; a concurrent caller for the same key parks here and finds
    /// the freshly stored value on its own re-check.
    pub async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut inflight = self.inflight.lock();
            // Locks nobody holds anymore are dead weight.
            inflight.retain(|_, m| Arc::strong_count(m) > 1);
            inflight
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
