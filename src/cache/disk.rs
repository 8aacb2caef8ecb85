//! Persistent cache tier backed by JSON files
//!
//! Each entry is stored as its own JSON document in the cache directory,
//! named after the SHA-256 of its key. Writes go to a temporary file that is
//! renamed over the target, so a reader sees either the previous document or
//! the new one. An in-memory index tracks sizes and access order so the store
//! can stay within its entry and byte limits by evicting the least recently
//! used entries.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::tier::CacheTier;
use crate::error::StoreError;

const RECORD_EXTENSION: &str = "json";

/// Upper bounds for the persistent tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskLimits {
    /// Maximum number of stored entries
    pub max_entries: usize,
    /// Maximum total size of stored entries in bytes (keys, payloads, validators)
    pub max_bytes: u64,
}

impl Default for DiskLimits {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            max_bytes: 64 * 1024 * 1024, // 64 MiB
        }
    }
}

/// On-disk representation of a cache entry
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    /// The logical key, kept so a file can be mapped back to it
    key: String,
    /// Payload bytes, base64 encoded
    payload: String,
    validator: Option<String>,
    stored_at: DateTime<Utc>,
    ttl_ms: u64,
}

impl DiskRecord {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            payload: BASE64.encode(&entry.payload),
            validator: entry.validator.clone(),
            stored_at: entry.stored_at,
            ttl_ms: u64::try_from(entry.ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn into_entry(self, path: &Path) -> Result<CacheEntry, StoreError> {
        let payload = BASE64
            .decode(self.payload.as_bytes())
            .map_err(|e| StoreError::corrupt(path, e))?;
        Ok(CacheEntry {
            key: self.key,
            payload: payload.into(),
            validator: self.validator,
            stored_at: self.stored_at,
            ttl: Duration::from_millis(self.ttl_ms),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: u64,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<String, IndexEntry>,
    total_bytes: u64,
    tick: u64,
}

impl Index {
    fn touch(&mut self, key: &str) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = tick;
        }
    }

    fn insert(&mut self, key: String, size: u64) {
        self.tick += 1;
        let entry = IndexEntry {
            size,
            last_used: self.tick,
        };
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_bytes -= old.size;
        }
        self.total_bytes += size;
    }

    fn remove(&mut self, key: &str) {
        if let Some(old) = self.entries.remove(key) {
            self.total_bytes -= old.size;
        }
    }

    /// Removes least recently used keys (other than `keep`) until within `limits`
    fn evict_over(&mut self, limits: DiskLimits, keep: &str) -> Vec<String> {
        let mut victims = Vec::new();
        while self.entries.len() > limits.max_entries || self.total_bytes > limits.max_bytes {
            let coldest = self
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != keep)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match coldest {
                Some(key) => {
                    self.remove(&key);
                    victims.push(key);
                }
                None => break,
            }
        }
        victims
    }
}

/// File-backed [`CacheTier`]
///
/// The store assumes it is the only writer of its directory.
#[derive(Debug)]
pub struct DiskStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
    limits: DiskLimits,
    index: Mutex<Index>,
    evictions: AtomicU64,
    tmp_counter: AtomicU64,
}

impl DiskStore {
    /// Returns the XDG-compliant default cache directory
    ///
    /// Uses `~/.cache/respcache/` on Linux, or the platform equivalent.
    /// Returns `None` if no home directory can be determined.
    pub fn default_dir() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "respcache")?;
        Some(project_dirs.cache_dir().to_path_buf())
    }

    /// Opens a store in `cache_dir`, indexing whatever entries it already holds
    ///
    /// The directory is created if missing. Files that cannot be decoded are
    /// left in place and reported when their key is next read.
    pub fn open(cache_dir: impl Into<PathBuf>, limits: DiskLimits) -> Result<Self, StoreError> {
        let store = Self {
            cache_dir: cache_dir.into(),
            limits,
            index: Mutex::new(Index::default()),
            evictions: AtomicU64::new(0),
            tmp_counter: AtomicU64::new(0),
        };
        store.ensure_dir()?;
        store.rebuild_index()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn limits(&self) -> DiskLimits {
        self.limits
    }

    /// Number of entries dropped to stay within [`DiskLimits`]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Total bytes currently accounted for
    pub fn total_bytes(&self) -> u64 {
        self.lock_index().total_bytes
    }

    fn lock_index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the path to the cache file for the given key
    fn cache_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.cache_dir
            .join(format!("{}.{}", hex::encode(digest), RECORD_EXTENSION))
    }

    /// Ensures the cache directory exists
    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| StoreError::io("create_dir", &self.cache_dir, e))
    }

    fn record_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        let read_dir = match fs::read_dir(&self.cache_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io("read_dir", &self.cache_dir, e)),
        };

        let mut paths = Vec::new();
        for dirent in read_dir {
            let dirent = dirent.map_err(|e| StoreError::io("read_dir", &self.cache_dir, e))?;
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn rebuild_index(&self) -> Result<(), StoreError> {
        let mut loaded = Vec::new();
        for path in self.record_paths()? {
            match read_record(&path) {
                Ok(Some(entry)) => loaded.push(entry),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable cache record"),
            }
        }
        // Oldest first, so access order starts out as write order
        loaded.sort_by_key(|e| e.stored_at);

        let mut index = self.lock_index();
        *index = Index::default();
        for entry in &loaded {
            index.insert(entry.key.clone(), entry.size_hint());
        }
        debug!(
            dir = %self.cache_dir.display(),
            entries = index.entries.len(),
            bytes = index.total_bytes,
            "Indexed persistent cache"
        );
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("remove", path, e)),
        }
    }
}

/// Reads and decodes one record; `Ok(None)` when the file does not exist
fn read_record(path: &Path) -> Result<Option<CacheEntry>, StoreError> {
    let content = match fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io("read", path, e)),
    };
    let record: DiskRecord =
        serde_json::from_slice(&content).map_err(|e| StoreError::corrupt(path, e))?;
    record.into_entry(path).map(Some)
}

impl CacheTier for DiskStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let path = self.cache_path(key);
        match read_record(&path)? {
            Some(entry) if entry.key == key => {
                self.lock_index().touch(key);
                Ok(Some(entry))
            }
            Some(other) => Err(StoreError::corrupt(
                &path,
                format!("record holds key '{}'", other.key),
            )),
            None => {
                // A put may have landed since the read
                let mut index = self.lock_index();
                if !path.exists() {
                    index.remove(key);
                }
                Ok(None)
            }
        }
    }

    fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        self.ensure_dir()?;

        let path = self.cache_path(&entry.key);
        let json = serde_json::to_vec_pretty(&DiskRecord::from_entry(&entry))
            .map_err(|e| StoreError::corrupt(&path, e))?;

        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{}", n));
        fs::write(&tmp, json).map_err(|e| StoreError::io("write", &tmp, e))?;

        // The file and its index entry change together
        let mut index = self.lock_index();
        if let Err(e) = fs::rename(&tmp, &path) {
            drop(index);
            if let Err(cleanup) = fs::remove_file(&tmp) {
                debug!(path = %tmp.display(), error = %cleanup, "Could not remove temp file");
            }
            return Err(StoreError::io("rename", &path, e));
        }
        index.insert(entry.key.clone(), entry.size_hint());
        for victim in index.evict_over(self.limits, &entry.key) {
            debug!(key = %victim, "Evicting least recently used cache entry");
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.delete_file(&self.cache_path(&victim))?;
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut index = self.lock_index();
        self.delete_file(&self.cache_path(key))?;
        index.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut index = self.lock_index();
        for path in self.record_paths()? {
            self.delete_file(&path)?;
        }
        *index = Index::default();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock_index().entries.keys().cloned().collect())
    }

    fn len(&self) -> usize {
        self.lock_index().entries.len()
    }
}
