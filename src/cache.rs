//! Two-tier preview cache.
//!
//! Keeps resolved preview URLs (data-URIs or routed URLs) per asset in memory
//! and mirrors them into a [`PersistentStore`]. An entry is only valid while
//! its marker equals the asset's current `last_modified_marker`; there is no
//! size eviction and no TTL.

use crate::store::PersistentStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Prefix of every preview key in the persistent store.
pub const KEY_PREFIX: &str = "preview:";

/// A cached preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub resolved_url: String,
    pub marker_at_cache_time: i64,
}

/// Persisted form: `{"url": ..., "timestamp": ...}`.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedPreview {
    url: String,
    timestamp: i64,
}

impl From<PersistedPreview> for CacheEntry {
    fn from(p: PersistedPreview) -> Self {
        Self {
            resolved_url: p.url,
            marker_at_cache_time: p.timestamp,
        }
    }
}

/// Preview cache owned by a session and shared by reference.
///
/// Delivery acceleration only: a miss never means the asset is gone.
pub struct PreviewCache {
    memory: RwLock<HashMap<String, CacheEntry>>,
    store: Arc<dyn PersistentStore>,
    hydrated: AtomicU64,
    write_failures: AtomicU64,
}

impl PreviewCache {
    /// Create a cache over `store` and hydrate memory from it.
    pub fn open(store: Arc<dyn PersistentStore>) -> Self {
        let cache = Self {
            memory: RwLock::new(HashMap::new()),
            store,
            hydrated: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        };
        let count = cache.hydrate();
        tracing::info!("Preview cache initialized: {} entries hydrated", count);
        cache
    }

    fn cache_key(asset_id: &str) -> String {
        format!("{KEY_PREFIX}{asset_id}")
    }

    fn read_persisted(&self, key: &str) -> Option<CacheEntry> {
        let raw = match self.store.get_item(key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!("Failed to read persisted preview {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str::<PersistedPreview>(&raw) {
            Ok(preview) => Some(preview.into()),
            Err(e) => {
                tracing::debug!("Ignoring malformed preview {}: {}", key, e);
                None
            }
        }
    }

    /// Scan the persistent store once and load every entry into memory.
    fn hydrate(&self) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Failed to enumerate persisted previews: {}", e);
                return 0;
            }
        };

        let mut loaded = HashMap::new();
        for key in keys {
            let Some(asset_id) = key.strip_prefix(KEY_PREFIX) else {
                continue;
            };
            if let Some(entry) = self.read_persisted(&key) {
                loaded.insert(asset_id.to_string(), entry);
            }
        }

        let count = loaded.len();
        if let Ok(mut memory) = self.memory.write() {
            memory.extend(loaded);
        }
        self.hydrated.store(count as u64, Ordering::Relaxed);
        count
    }

    /// Look up a preview. The persistent store is consulted first, then memory;
    /// an entry whose marker differs from `current_marker` is a miss.
    pub fn get(&self, asset_id: &str, current_marker: i64) -> Option<String> {
        let key = Self::cache_key(asset_id);
        if let Some(entry) = self.read_persisted(&key) {
            if entry.marker_at_cache_time == current_marker {
                return Some(entry.resolved_url);
            }
        }

        let memory = self.memory.read().ok()?;
        memory
            .get(asset_id)
            .filter(|entry| entry.marker_at_cache_time == current_marker)
            .map(|entry| entry.resolved_url.clone())
    }

    /// Record a preview in memory and, best effort, in the persistent store.
    /// Store failures are logged and counted, never returned.
    pub fn put(&self, asset_id: &str, resolved_url: &str, marker: i64) {
        if let Ok(mut memory) = self.memory.write() {
            memory.insert(
                asset_id.to_string(),
                CacheEntry {
                    resolved_url: resolved_url.to_string(),
                    marker_at_cache_time: marker,
                },
            );
        }

        let key = Self::cache_key(asset_id);
        let persisted = PersistedPreview {
            url: resolved_url.to_string(),
            timestamp: marker,
        };
        let result = serde_json::to_string(&persisted)
            .map_err(|e| e.to_string())
            .and_then(|json| self.store.set_item(&key, &json).map_err(|e| e.to_string()));

        if let Err(e) = result {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Failed to persist preview for {}: {}", asset_id, e);
        }
    }

    /// Drop every preview from memory and the persistent store.
    pub fn clear(&self) {
        if let Ok(mut memory) = self.memory.write() {
            memory.clear();
        }
        match self.store.keys() {
            Ok(keys) => {
                for key in keys.iter().filter(|k| k.starts_with(KEY_PREFIX)) {
                    if let Err(e) = self.store.remove_item(key) {
                        tracing::warn!("Failed to remove persisted preview {}: {}", key, e);
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to enumerate persisted previews: {}", e),
        }
    }

    /// Delete persisted previews whose marker no longer matches `current`
    /// (asset id -> marker). Assets absent from `current` are left alone.
    pub fn prune_stale(&self, current: &HashMap<String, i64>) -> usize {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("Failed to enumerate persisted previews: {}", e);
                return 0;
            }
        };

        let mut pruned = 0;
        for key in keys {
            let Some(asset_id) = key.strip_prefix(KEY_PREFIX) else {
                continue;
            };
            let Some(&marker) = current.get(asset_id) else {
                continue;
            };
            let stale = self
                .read_persisted(&key)
                .is_some_and(|entry| entry.marker_at_cache_time != marker);
            if stale && self.store.remove_item(&key).is_ok() {
                pruned += 1;
            }
        }

        tracing::debug!("Pruned {} stale previews", pruned);
        pruned
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.memory.read().map(|m| m.len()).unwrap_or(0),
            hydrated: self.hydrated.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hydrated: u64,
    pub write_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DirStore, MemoryStore};

    #[test]
    fn put_then_get_with_same_marker_hits() {
        let cache = PreviewCache::open(Arc::new(MemoryStore::new()));
        cache.put("a1", "data:image/jpeg;base64,AAAA", 1000);

        assert_eq!(cache.get("a1", 1000).as_deref(), Some("data:image/jpeg;base64,AAAA"));
        assert_eq!(cache.get("a1", 1001), None);
        assert_eq!(cache.get("a2", 1000), None);
    }

    #[test]
    fn new_marker_replaces_entry() {
        let cache = PreviewCache::open(Arc::new(MemoryStore::new()));
        cache.put("a1", "old", 1);
        cache.put("a1", "new", 2);

        assert_eq!(cache.get("a1", 1), None);
        assert_eq!(cache.get("a1", 2).as_deref(), Some("new"));
    }

    #[test]
    fn quota_failure_is_swallowed_and_memory_still_serves() {
        let cache = PreviewCache::open(Arc::new(MemoryStore::with_quota(16)));
        cache.put("a1", &"x".repeat(1024), 7);

        assert_eq!(cache.get("a1", 7).map(|u| u.len()), Some(1024));
        assert_eq!(cache.stats().write_failures, 1);
    }

    #[test]
    fn reopened_cache_is_hydrated_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = PreviewCache::open(Arc::new(DirStore::open(dir.path()).unwrap()));
            cache.put("a1", "data:one", 10);
            cache.put("a2", "data:two", 20);
        }

        let store = Arc::new(DirStore::open(dir.path()).unwrap());
        let cache = PreviewCache::open(store.clone());
        assert_eq!(cache.stats().hydrated, 2);

        // Memory alone still answers once the persisted copy is gone.
        store.remove_item("preview:a1").unwrap();
        assert_eq!(cache.get("a1", 10).as_deref(), Some("data:one"));
    }

    #[test]
    fn malformed_persisted_entries_are_misses() {
        let store = Arc::new(MemoryStore::new());
        store.set_item("preview:a1", "{not json").unwrap();
        store.set_item("unrelated", "{}").unwrap();

        let cache = PreviewCache::open(store);
        assert_eq!(cache.stats().hydrated, 0);
        assert_eq!(cache.get("a1", 0), None);
    }

    #[test]
    fn clear_and_prune() {
        let store = Arc::new(MemoryStore::new());
        store.set_item("unrelated", "keep").unwrap();
        let cache = PreviewCache::open(store.clone());
        cache.put("a1", "u1", 1);
        cache.put("a2", "u2", 2);
        cache.put("a3", "u3", 3);

        let current = HashMap::from([("a1".to_string(), 1), ("a2".to_string(), 99)]);
        assert_eq!(cache.prune_stale(&current), 1);
        assert!(store.get_item("preview:a2").unwrap().is_none());
        assert!(store.get_item("preview:a3").unwrap().is_some());

        cache.clear();
        assert_eq!(cache.get("a1", 1), None);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(store.keys().unwrap(), vec!["unrelated"]);
    }
}
