//! Result caching for drivers.
//!
//! [`CacheDecorator`] wraps any [`GeoLocationDriver`] and consults a
//! [`CacheStore`] before delegating. Only successful lookups are stored.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::policy::Expiry;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::{CacheConfig, CachePolicy, StoreKind};
use crate::driver::GeoLocationDriver;
use crate::error::{Error, Result};
use crate::location::Location;

/// Key/value storage for resolved locations, grouped by tag.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str, tag: &str) -> Option<Location>;

    fn put(&self, key: &str, value: &Location, ttl: Duration, tag: &str);

    /// Drop every entry stored under `tag`.
    fn flush(&self, tag: &str) -> Result<()>;
}

/// Build the store selected by `config`.
pub fn store_from_config(config: &CacheConfig) -> Arc<dyn CacheStore> {
    match config.store {
        StoreKind::Memory => Arc::new(MemoryStore::new(config.max_capacity)),
        StoreKind::File => Arc::new(FileStore::new(config.file_path())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TaggedKey {
    tag: String,
    key: String,
}

#[derive(Debug, Clone)]
struct Entry {
    location: Location,
    ttl: Duration,
}

struct EntryExpiry;

impl Expiry<TaggedKey, Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &TaggedKey,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &TaggedKey,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process store.
pub struct MemoryStore {
    inner: Cache<TaggedKey, Entry>,
}

impl MemoryStore {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .support_invalidation_closures()
            .build();
        debug!(max_capacity, "memory cache store initialized");
        Self { inner }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str, tag: &str) -> Option<Location> {
        let key = TaggedKey {
            tag: tag.to_string(),
            key: key.to_string(),
        };
        self.inner.get(&key).map(|entry| entry.location)
    }

    fn put(&self, key: &str, value: &Location, ttl: Duration, tag: &str) {
        let key = TaggedKey {
            tag: tag.to_string(),
            key: key.to_string(),
        };
        self.inner.insert(
            key,
            Entry {
                location: value.clone(),
                ttl,
            },
        );
    }

    fn flush(&self, tag: &str) -> Result<()> {
        let tag = tag.to_string();
        self.inner
            .invalidate_entries_if(move |key, _| key.tag == tag)
            .map_err(|e| Error::Cache(e.to_string()))?;
        self.inner.run_pending_tasks();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    location: Location,
    /// Unix epoch milliseconds.
    expires_at: i64,
}

type FileContents = HashMap<String, HashMap<String, FileEntry>>;

/// JSON file store shared by successive processes.
///
/// Writers serialize on an advisory lock over a sibling `.lock` file and
/// replace the cache file by rename, so readers never see a partial file.
/// Unreadable or corrupt files behave as an empty cache.
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: lock_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Block until this process holds the write lock. Dropping the file releases it.
    fn lock_exclusive(&self) -> io::Result<File> {
        fs::create_dir_all(self.dir())?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)?;
        file.lock()?;
        Ok(file)
    }

    /// A missing or corrupt file reads as empty; other I/O errors are returned
    /// so the caller does not overwrite a file it could not see.
    fn read(&self) -> io::Result<FileContents> {
        match fs::read_to_string(&self.path) {
            Ok(data) => Ok(serde_json::from_str(&data).unwrap_or_default()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileContents::new()),
            Err(e) => Err(e),
        }
    }

    fn write(&self, contents: &FileContents) -> io::Result<()> {
        let mut tmp = NamedTempFile::new_in(self.dir())?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), contents)?;
        tmp.as_file_mut().flush()?;
        tmp.persist(&self.path)?;
        Ok(())
    }

    fn insert(&self, key: &str, value: &Location, ttl: Duration, tag: &str) -> io::Result<()> {
        let _lock = self.lock_exclusive()?;
        let now = now_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let mut contents = self.read()?;
        for entries in contents.values_mut() {
            entries.retain(|_, entry| entry.expires_at > now);
        }
        contents.retain(|_, entries| !entries.is_empty());
        contents.entry(tag.to_string()).or_default().insert(
            key.to_string(),
            FileEntry {
                location: value.clone(),
                expires_at: now.saturating_add(ttl_ms),
            },
        );
        self.write(&contents)
    }

    fn remove_tag(&self, tag: &str) -> io::Result<()> {
        let _lock = self.lock_exclusive()?;
        let mut contents = self.read()?;
        if contents.remove(tag).is_none() {
            return Ok(());
        }
        self.write(&contents)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl CacheStore for FileStore {
    fn get(&self, key: &str, tag: &str) -> Option<Location> {
        let contents = self.read().ok()?;
        let entry = contents.get(tag)?.get(key)?;
        if entry.expires_at <= now_millis() {
            return None;
        }
        Some(entry.location.clone())
    }

    fn put(&self, key: &str, value: &Location, ttl: Duration, tag: &str) {
        if let Err(e) = self.insert(key, value, ttl, tag) {
            warn!(path = %self.path.display(), "failed to write cache file: {}", e);
        }
    }

    fn flush(&self, tag: &str) -> Result<()> {
        self.remove_tag(tag)
            .map_err(|e| Error::Cache(format!("cannot rewrite {}: {}", self.path.display(), e)))
    }
}

/// A driver whose successful results are cached.
pub struct CacheDecorator {
    inner: Arc<dyn GeoLocationDriver>,
    policy: CachePolicy,
    store: Arc<dyn CacheStore>,
}

impl CacheDecorator {
    pub fn new(
        inner: Arc<dyn GeoLocationDriver>,
        policy: CachePolicy,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        Self { inner, policy, store }
    }
}

impl GeoLocationDriver for CacheDecorator {
    fn resolve(&self, ip: &str) -> Result<Location> {
        if !self.policy.enabled {
            return self.inner.resolve(ip);
        }

        let key = self.policy.key(ip);
        if let Some(hit) = self.store.get(&key, &self.policy.tag) {
            debug!(driver = self.inner.name(), %key, "cache hit");
            return Ok(hit.with_ip(ip).cached());
        }

        debug!(driver = self.inner.name(), %key, "cache miss");
        let location = self.inner.resolve(ip)?;
        self.store
            .put(&key, &location, self.policy.ttl(), &self.policy.tag);
        Ok(location)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDriver {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingDriver {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl GeoLocationDriver for CountingDriver {
        fn resolve(&self, ip: &str) -> Result<Location> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::not_found("backend down"));
            }
            Ok(Location::new(ip).with_city(Some("Mountain View".into())))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    /// Memory store that counts reads and writes.
    #[derive(Default)]
    struct SpyStore {
        inner: MemoryStore,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl CacheStore for SpyStore {
        fn get(&self, key: &str, tag: &str) -> Option<Location> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key, tag)
        }

        fn put(&self, key: &str, value: &Location, ttl: Duration, tag: &str) {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, value, ttl, tag)
        }

        fn flush(&self, tag: &str) -> Result<()> {
            self.inner.flush(tag)
        }
    }

    fn policy(enabled: bool) -> CachePolicy {
        CacheConfig {
            enabled,
            ..CacheConfig::default()
        }
        .policy()
    }

    #[test]
    fn miss_then_hit() {
        let backend = CountingDriver::new(false);
        let store = Arc::new(SpyStore::default());
        let cached = CacheDecorator::new(backend.clone(), policy(true), store.clone());

        let first = cached.resolve("8.8.8.8").unwrap();
        assert!(!first.is_from_cache());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);

        let second = cached.resolve("8.8.8.8").unwrap();
        assert!(second.is_from_cache());
        assert_eq!(second.city(), Some("Mountain View"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);

        assert!(store.inner.get("geolocation_8.8.8.8", "geolocation").is_some());
    }

    #[test]
    fn failures_are_not_cached() {
        let backend = CountingDriver::new(true);
        let store = Arc::new(SpyStore::default());
        let cached = CacheDecorator::new(backend.clone(), policy(true), store.clone());

        assert!(cached.resolve("8.8.8.8").is_err());
        assert!(cached.resolve("8.8.8.8").is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disabled_policy_bypasses_store() {
        let backend = CountingDriver::new(false);
        let store = Arc::new(SpyStore::default());
        let cached = CacheDecorator::new(backend.clone(), policy(false), store.clone());

        cached.resolve("8.8.8.8").unwrap();
        let again = cached.resolve("8.8.8.8").unwrap();
        assert!(!again.is_from_cache());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn memory_flush_is_per_tag() {
        let store = MemoryStore::default();
        let loc = Location::new("1.1.1.1");
        store.put("k", &loc, Duration::from_secs(60), "geolocation");
        store.put("k", &loc, Duration::from_secs(60), "other");

        store.flush("geolocation").unwrap();
        assert!(store.get("k", "geolocation").is_none());
        assert_eq!(store.get("k", "other"), Some(loc));
    }

    #[test]
    fn file_store_persists_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("geo.json");
        let loc = Location::new("9.9.9.9").with_country(Some("Switzerland".into()));

        let ttl = Duration::from_secs(600);
        FileStore::new(&path).put("geolocation_9.9.9.9", &loc, ttl, "geolocation");

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("geolocation_9.9.9.9", "geolocation"), Some(loc));
        assert_eq!(reopened.get("geolocation_9.9.9.9", "other"), None);

        reopened.flush("geolocation").unwrap();
        assert_eq!(reopened.get("geolocation_9.9.9.9", "geolocation"), None);
    }

    #[test]
    fn file_store_expired_entries_are_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("geo.json"));
        store.put("k", &Location::new("9.9.9.9"), Duration::ZERO, "geolocation");
        assert_eq!(store.get("k", "geolocation"), None);
    }

    #[test]
    fn file_store_ignores_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.get("k", "geolocation"), None);
        store.put("k", &Location::new("9.9.9.9"), Duration::from_secs(60), "geolocation");
        assert!(store.get("k", "geolocation").is_some());
    }

    #[test]
    fn file_store_keeps_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo.json");

        let writers: Vec<_> = (0..4)
            .map(|worker| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = FileStore::new(path);
                    for n in 0..50 {
                        let ip = format!("10.{}.0.{}", worker, n);
                        let loc = Location::new(ip.as_str());
                        store.put(&ip, &loc, Duration::from_secs(600), "geolocation");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let store = FileStore::new(&path);
        for worker in 0..4 {
            for n in 0..50 {
                let ip = format!("10.{}.0.{}", worker, n);
                assert_eq!(store.get(&ip, "geolocation").map(|l| l.ip().to_string()), Some(ip));
            }
        }
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name != "geo.json" && name != "geo.json.lock")
            .collect();
        assert!(leftovers.is_empty(), "stray files: {leftovers:?}");
    }
}
