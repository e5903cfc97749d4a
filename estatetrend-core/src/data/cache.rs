//! Write-once payload cache keyed by `RequestKey`.
//!
//! Two stores share the `CacheStore` trait:
//! - `MemoryCache`: process-lifetime map behind an `RwLock`
//! - `FileCache`: one JSON entry per key, Hive-style layout
//!   `{cache_dir}/area={REGION}/{year}-{classification}.json`
//!
//! Entries are never overwritten: `put` on a present key fails with
//! `AlreadyExists`. Re-fetching a key means `remove` or `clear` first.
//! There is no eviction; the key space is years × regions × classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

use crate::domain::RequestKey;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry already exists for {0}")]
    AlreadyExists(RequestKey),

    #[error("cache I/O error: {0}")]
    Io(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// One cached upstream response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub fetched_at: DateTime<Utc>,
    pub payload: String,
    /// BLAKE3 hex digest of `payload`, checked on load.
    pub payload_hash: String,
}

impl CacheEntry {
    /// Stamp a freshly fetched payload with the current time and its hash.
    pub fn new(key: RequestKey, payload: String) -> Self {
        let payload_hash = hash_payload(&payload);
        Self {
            key,
            fetched_at: Utc::now(),
            payload,
            payload_hash,
        }
    }

    pub fn is_intact(&self) -> bool {
        hash_payload(&self.payload) == self.payload_hash
    }
}

fn hash_payload(payload: &str) -> String {
    blake3::hash(payload.as_bytes()).to_hex().to_string()
}

/// Key → payload store shared by all fetch workers.
///
/// Implementations must be safe for concurrent readers and writers; the
/// orchestrator guarantees at most one writer per key.
pub trait CacheStore: Send + Sync {
    /// Read-through lookup. A miss is `Ok(None)`, not an error.
    fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Store a new entry. Fails if the key is already present.
    fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Drop a single entry (no-op when absent).
    fn remove(&self, key: &RequestKey) -> Result<(), CacheError>;

    /// Drop every entry.
    fn clear(&self) -> Result<(), CacheError>;

    /// Number of stored entries.
    fn len(&self) -> Result<usize, CacheError>;

    fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

// ── In-memory ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<RequestKey, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Io("cache lock poisoned".into())
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        if entries.contains_key(&entry.key) {
            return Err(CacheError::AlreadyExists(entry.key));
        }
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn remove(&self, key: &RequestKey) -> Result<(), CacheError> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }
}

// ── On-disk ──────────────────────────────────────────────────────────

/// JSON-file cache with atomic writes and corrupt-entry quarantine.
pub struct FileCache {
    cache_dir: PathBuf,
    /// Serializes the exists-check + rename in `put`.
    write_lock: Mutex<()>,
}

impl FileCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)
            .map_err(|e| CacheError::Io(format!("failed to create cache dir: {e}")))?;
        Ok(Self {
            cache_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory for one area: `{cache_dir}/area={REGION}/`
    fn area_dir(&self, region: &str) -> PathBuf {
        self.cache_dir.join(format!("area={region}"))
    }

    /// Path for one key: `{cache_dir}/area={REGION}/{year}-{classification}.json`
    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        self.area_dir(&key.region)
            .join(format!("{}-{}.json", key.year, key.classification))
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        let areas = fs::read_dir(&self.cache_dir)
            .map_err(|e| CacheError::Io(format!("read dir: {e}")))?;
        for area in areas {
            let area = area.map_err(|e| CacheError::Io(format!("dir entry: {e}")))?;
            if !area.path().is_dir() {
                continue;
            }
            let entries = fs::read_dir(area.path())
                .map_err(|e| CacheError::Io(format!("read dir: {e}")))?;
            for entry in entries {
                let path = entry
                    .map_err(|e| CacheError::Io(format!("dir entry: {e}")))?
                    .path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    fn quarantine(path: &Path, reason: &str) {
        let target = path.with_extension("json.quarantined");
        tracing::warn!(
            path = %path.display(),
            reason,
            "quarantining corrupt cache entry"
        );
        let _ = fs::rename(path, target);
    }
}

impl CacheStore for FileCache {
    fn get(&self, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io(format!("read {}: {e}", path.display()))),
        };

        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                Self::quarantine(&path, &e.to_string());
                return Ok(None);
            }
        };
        if entry.key != *key || !entry.is_intact() {
            Self::quarantine(&path, "key or payload hash mismatch");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let path = self.entry_path(&entry.key);
        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let _guard = self.write_lock.lock().map_err(poisoned)?;
        if path.exists() {
            return Err(CacheError::AlreadyExists(entry.key));
        }
        fs::create_dir_all(self.area_dir(&entry.key.region))
            .map_err(|e| CacheError::Io(format!("failed to create dir: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| CacheError::Io(format!("write: {e}")))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            CacheError::Io(format!("atomic rename failed: {e}"))
        })?;
        Ok(())
    }

    fn remove(&self, key: &RequestKey) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(format!("remove {}: {e}", path.display()))),
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        for path in self.entry_files()? {
            fs::remove_file(&path)
                .map_err(|e| CacheError::Io(format!("remove {}: {e}", path.display())))?;
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entry_files()?.len())
    }
}
