//! Persistent key-value store behind the preview cache.
//!
//! A deliberately small interface: get, set, remove and key enumeration for
//! startup hydration. No transactions and no cross-process locking; the last
//! writer wins.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("quota exceeded: {needed} bytes needed, limit is {limit}")]
    QuotaExceeded { needed: u64, limit: u64 },

    #[error("corrupt entry {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

pub trait PersistentStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove_item(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// On-disk envelope; file names are hashed, so the key travels inside.
#[derive(Debug, Serialize, Deserialize)]
struct StoredItem {
    key: String,
    value: String,
}

/// One JSON file per key under a directory.
pub struct DirStore {
    dir: PathBuf,
    /// Optional cap on the directory's total size.
    quota: Option<u64>,
}

impl DirStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            context: "creating store directory",
            source,
        })?;
        Ok(Self { dir, quota: None })
    }

    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn item_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{digest:x}.json"))
    }

    fn entries(&self) -> impl Iterator<Item = walkdir::DirEntry> {
        WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file() && e.path().extension().is_some_and(|ext| ext == "json")
            })
    }

    fn used_bytes_excluding(&self, skip: &Path) -> u64 {
        self.entries()
            .filter(|e| e.path() != skip)
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    fn read_item(path: &Path) -> Result<StoredItem, StoreError> {
        let json = fs::read_to_string(path).map_err(|source| StoreError::Io {
            context: "reading store entry",
            source,
        })?;
        serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

impl PersistentStore for DirStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.item_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let item = Self::read_item(&path)?;
        Ok((item.key == key).then_some(item.value))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.item_path(key);
        let json = serde_json::to_string(&StoredItem {
            key: key.to_string(),
            value: value.to_string(),
        })
        .map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if let Some(limit) = self.quota {
            let needed = self.used_bytes_excluding(&path) + json.len() as u64;
            if needed > limit {
                return Err(StoreError::QuotaExceeded { needed, limit });
            }
        }

        // Write then rename so a reader never sees a torn entry.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            context: "writing store entry",
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            context: "committing store entry",
            source,
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.item_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                context: "removing store entry",
                source,
            }),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in self.entries() {
            match Self::read_item(entry.path()) {
                Ok(item) => keys.push(item.key),
                Err(e) => tracing::warn!("Skipping unreadable store entry: {}", e),
            }
        }
        Ok(keys)
    }
}

/// Process-local store, for ephemeral sessions and tests.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, String>>,
    quota: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on the summed length of keys and values.
    pub fn with_quota(bytes: u64) -> Self {
        Self {
            items: Mutex::default(),
            quota: Some(bytes),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PersistentStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut items = self.lock();
        if let Some(limit) = self.quota {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = (used + key.len() + value.len()) as u64;
            if needed > limit {
                return Err(StoreError::QuotaExceeded { needed, limit });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_store_round_trips_and_enumerates() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap();

        store.set_item("preview:a1", "one").unwrap();
        store.set_item("preview:b/2", "two").unwrap();
        store.set_item("preview:a1", "uno").unwrap();

        assert_eq!(store.get_item("preview:a1").unwrap().as_deref(), Some("uno"));
        assert_eq!(store.get_item("missing").unwrap(), None);

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["preview:a1", "preview:b/2"]);

        store.remove_item("preview:a1").unwrap();
        store.remove_item("preview:a1").unwrap();
        assert_eq!(store.get_item("preview:a1").unwrap(), None);
    }

    #[test]
    fn dir_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        DirStore::open(dir.path()).unwrap().set_item("k", "v").unwrap();

        let reopened = DirStore::open(dir.path()).unwrap();
        assert_eq!(reopened.keys().unwrap(), vec!["k"]);
    }

    #[test]
    fn quota_rejects_oversized_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).unwrap().with_quota(64);
        assert!(matches!(
            store.set_item("big", &"x".repeat(100)),
            Err(StoreError::QuotaExceeded { .. })
        ));

        let memory = MemoryStore::with_quota(8);
        memory.set_item("k", "1234").unwrap();
        // Overwrites only count the new value.
        memory.set_item("k", "12345").unwrap();
        assert!(memory.set_item("other", "1234").is_err());
    }
}
