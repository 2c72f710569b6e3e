use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;

/// A cached response: body, headers, and freshness metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Unix seconds at which the response was received.
    pub stored_at: u64,
    /// Freshness lifetime from `Cache-Control: max-age`, else the configured
    /// default. Zero means never fresh (no-store / no-cache responses).
    pub lifetime_secs: u64,
}

impl CacheEntry {
    pub fn from_response(
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        default_lifetime: Duration,
    ) -> Self {
        let lifetime_secs = freshness_lifetime(&headers).unwrap_or(default_lifetime.as_secs());
        Self {
            status,
            headers,
            body,
            stored_at: now_secs(),
            lifetime_secs,
        }
    }

    pub fn is_fresh(&self, now: u64) -> bool {
        now < self.stored_at.saturating_add(self.lifetime_secs)
    }
}

fn freshness_lifetime(headers: &[(String, String)]) -> Option<u64> {
    let value = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("cache-control"))
        .map(|(_, value)| value.as_str())?;

    let mut max_age = None;
    for directive in value.split(',') {
        let directive = directive.trim();
        if directive.eq_ignore_ascii_case("no-store") || directive.eq_ignore_ascii_case("no-cache")
        {
            return Some(0);
        }
        if let Some(secs) = directive.strip_prefix("max-age=") {
            if let Ok(secs) = secs.parse::<u64>() {
                max_age = Some(secs);
            }
        }
    }
    max_age
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// On-disk record: one JSON file per key, body carried base64.
#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    stored_at: u64,
    lifetime_secs: u64,
    accessed_at: u64,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    path: PathBuf,
    size: u64,
}

/// Bounded on-disk response store, least-recently-used eviction by byte
/// budget.
///
/// Shared across requests; every operation runs in one critical section.
/// All disk failures degrade to a cache miss: the cache is best-effort and
/// never a correctness dependency.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    dir: PathBuf,
    ceiling: u64,
    total: u64,
    index: LruCache<String, IndexEntry>,
}

impl ResponseCache {
    /// Open the cache in `dir`, reloading surviving entries. Entries that
    /// fail to parse are removed; recency is seeded from recorded access
    /// times.
    pub fn open(dir: impl Into<PathBuf>, ceiling: u64) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), "failed to create cache directory: {e}");
        }

        let mut records = Vec::new();
        if let Ok(listing) = fs::read_dir(&dir) {
            for file in listing.flatten() {
                let path = file.path();
                if path.extension().map(|ext| ext == "json") != Some(true) {
                    continue;
                }
                match read_disk_entry(&path) {
                    Ok(entry) => {
                        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
                        records.push((entry.accessed_at, entry.key, path, size));
                    }
                    Err(e) => {
                        warn!(path = %path.display(), "dropping unreadable cache entry: {e}");
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }

        // Oldest access first, so the LRU order survives a restart.
        records.sort();
        let mut index = LruCache::unbounded();
        let mut total = 0;
        for (_, key, path, size) in records {
            total += size;
            index.put(key, IndexEntry { path, size });
        }
        debug!(entries = index.len(), total, "response cache opened");

        Self {
            inner: Mutex::new(CacheInner {
                dir,
                ceiling,
                total,
                index,
            }),
        }
    }

    /// Fetch a fresh entry for `key`, touching its recency. Expired entries
    /// are removed on the way out.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.lock();

        let path = inner.index.get(key)?.path.clone();
        let disk = match read_disk_entry(&path) {
            Ok(disk) => disk,
            Err(e) => {
                warn!(key, "failed to read cache entry, treating as miss: {e}");
                remove_entry(&mut inner, key);
                return None;
            }
        };

        // Key hash collision: the file belongs to someone else.
        if disk.key != key {
            return None;
        }

        let entry = CacheEntry {
            status: disk.status,
            headers: disk.headers,
            body: match general_purpose::STANDARD.decode(&disk.body) {
                Ok(body) => body,
                Err(e) => {
                    warn!(key, "corrupt cache body, treating as miss: {e}");
                    remove_entry(&mut inner, key);
                    return None;
                }
            },
            stored_at: disk.stored_at,
            lifetime_secs: disk.lifetime_secs,
        };

        if !entry.is_fresh(now_secs()) {
            debug!(key, "cache entry expired");
            remove_entry(&mut inner, key);
            return None;
        }

        Some(entry)
    }

    /// Store `entry` under `key`, overwriting any previous entry, then evict
    /// least-recently-used entries until the byte budget holds. Write
    /// failures are logged and leave the cache without the entry.
    pub fn store(&self, key: &str, entry: CacheEntry) {
        let mut inner = self.lock();

        let path = inner.dir.join(file_name(key));
        let disk = DiskEntry {
            key: key.to_string(),
            status: entry.status,
            headers: entry.headers,
            body: general_purpose::STANDARD.encode(&entry.body),
            stored_at: entry.stored_at,
            lifetime_secs: entry.lifetime_secs,
            accessed_at: now_secs(),
        };

        let data = match serde_json::to_vec(&disk) {
            Ok(data) => data,
            Err(e) => {
                warn!(key, "failed to encode cache entry: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(&path, &data) {
            warn!(key, "failed to write cache entry: {e}");
            remove_entry(&mut inner, key);
            return;
        }

        if let Some(old) = inner.index.pop(key) {
            inner.total -= old.size;
        }
        let size = data.len() as u64;
        inner.total += size;
        inner.index.put(key.to_string(), IndexEntry { path, size });

        while inner.total > inner.ceiling {
            match inner.index.pop_lru() {
                Some((evicted, old)) => {
                    debug!(key = %evicted, "evicting cache entry over byte budget");
                    let _ = fs::remove_file(&old.path);
                    inner.total -= old.size;
                }
                None => break,
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn remove_entry(inner: &mut CacheInner, key: &str) {
    if let Some(old) = inner.index.pop(key) {
        inner.total -= old.size;
        let _ = fs::remove_file(&old.path);
    }
}

fn read_disk_entry(path: &Path) -> Result<DiskEntry, CacheError> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

fn file_name(key: &str) -> String {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    format!("{:016x}.json", hasher.finish())
}
