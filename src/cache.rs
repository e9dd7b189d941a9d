use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{CacheBackendKind, Settings};

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Function name plus its parameters; parameter order does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    function: String,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn function(&self) -> &str {
        &self.function
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.function)?;
        let mut sep = '?';
        for (name, value) in &self.params {
            write!(f, "{sep}")?;
            write_escaped(f, name)?;
            f.write_char('=')?;
            write_escaped(f, value)?;
            sep = '&';
        }
        Ok(())
    }
}

/// Percent-escapes the key delimiters so distinct parameter sets never collide.
fn write_escaped(f: &mut fmt::Formatter<'_>, raw: &str) -> fmt::Result {
    for ch in raw.chars() {
        match ch {
            '%' | '&' | '=' | '?' => write!(f, "%{:02X}", ch as u32)?,
            _ => f.write_char(ch)?,
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at_ms: u64,
}

impl CacheEntry {
    pub fn is_fresh(&self, now_ms: u64, ttl: Duration) -> bool {
        (now_ms.saturating_sub(self.created_at_ms) as u128) < ttl.as_millis()
    }
}

/// Storage for cache entries. Implementations only store and load; expiry
/// is decided by [`Cache`].
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn load(&self, key: &str) -> Result<Option<CacheEntry>>;
    fn store(&self, entry: &CacheEntry) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory cache lock poisoned"))
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn store(&self, entry: &CacheEntry) -> Result<()> {
        self.entries()?.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries()?.clear();
        Ok(())
    }
}

/// One JSON file per key, named by the hashed key.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", URL_SAFE_NO_PAD.encode(digest)))
    }
}

impl CacheBackend for FileBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read cache file {}", path.display()))?;
        let entry: CacheEntry = serde_json::from_str(&raw)
            .with_context(|| format!("decode cache file {}", path.display()))?;
        if entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn store(&self, entry: &CacheEntry) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cache dir {}", self.dir.display()))?;
        let path = self.path_for(&entry.key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(entry).context("serialize cache entry")?;
        fs::write(&tmp, json).context("write cache entry")?;
        fs::rename(&tmp, &path).context("swap cache entry")?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("remove cache file {}", path.display()))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for item in fs::read_dir(&self.dir).context("list cache dir")? {
            let path = item.context("read cache dir entry")?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path)
                    .with_context(|| format!("remove cache file {}", path.display()))?;
            }
        }
        Ok(())
    }
}

/// Key-value table in a SQLite database.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite cache {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite cache")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .context("create sqlite cache schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite cache lock poisoned"))
    }
}

impl CacheBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT value, created_at FROM cache_entries WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .context("query cache entry")?;
        let Some((value, created_at)) = row else {
            return Ok(None);
        };
        let value = serde_json::from_str(&value).context("decode cache value")?;
        Ok(Some(CacheEntry {
            key: key.to_string(),
            value,
            created_at_ms: created_at.max(0) as u64,
        }))
    }

    fn store(&self, entry: &CacheEntry) -> Result<()> {
        let value = serde_json::to_string(&entry.value).context("serialize cache value")?;
        self.conn()?
            .execute(
                "INSERT INTO cache_entries (key, value, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, created_at = excluded.created_at",
                params![entry.key, value, entry.created_at_ms as i64],
            )
            .context("upsert cache entry")?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
            .context("delete cache entry")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM cache_entries", [])
            .context("clear cache entries")?;
        Ok(())
    }
}

/// Never stores anything; every lookup is a miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl CacheBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn load(&self, _key: &str) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    fn store(&self, _entry: &CacheEntry) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// TTL memoization over a [`CacheBackend`].
pub struct Cache {
    backend: Box<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Cache {
    pub fn new(backend: Box<dyn CacheBackend>, clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            backend,
            clock,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn in_memory(default_ttl: Duration) -> Self {
        Self::new(Box::new(MemoryBackend::new()), Arc::new(SystemClock), default_ttl)
    }

    /// Builds the backend named by `CACHE_TYPE`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let backend: Box<dyn CacheBackend> = match settings.cache_backend {
            CacheBackendKind::Memory => Box::new(MemoryBackend::new()),
            CacheBackendKind::Filesystem => Box::new(FileBackend::new(&settings.cache_dir)),
            CacheBackendKind::Sqlite => Box::new(SqliteBackend::open(
                &settings.cache_dir.join("cache.sqlite"),
            )?),
            CacheBackendKind::Null => Box::new(NullBackend),
        };
        Ok(Self::new(backend, Arc::new(SystemClock), settings.cache_default_ttl))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Returns the cached value for `key` when it is younger than `ttl`,
    /// otherwise runs `compute` and stores its result. Errors from `compute`
    /// are returned as-is and nothing is stored.
    pub fn get_or_compute<T, E, F>(&self, key: &CacheKey, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        let key = key.to_string();
        if let Some(value) = self.lookup::<T>(&key, ttl) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, backend = self.backend.name(), "cache hit");
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, backend = self.backend.name(), "cache miss");

        let value = compute()?;
        match serde_json::to_value(&value) {
            Ok(json) => {
                let entry = CacheEntry {
                    key: key.clone(),
                    value: json,
                    created_at_ms: self.clock.now_millis(),
                };
                if let Err(err) = self.backend.store(&entry) {
                    warn!(key = %key, error = %err, "cache store failed");
                }
            }
            Err(err) => warn!(key = %key, error = %err, "cache value not serializable"),
        }
        Ok(value)
    }

    /// Same as [`Cache::get_or_compute`] with the configured default TTL.
    pub fn memoize<T, E, F>(&self, key: &CacheKey, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        self.get_or_compute(key, self.default_ttl, compute)
    }

    pub fn invalidate(&self, key: &CacheKey) {
        let key = key.to_string();
        if let Err(err) = self.backend.remove(&key) {
            warn!(key = %key, error = %err, "cache remove failed");
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Option<T> {
        let entry = match self.backend.load(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = %err, "cache load failed, treating as miss");
                return None;
            }
        };

        if !entry.is_fresh(self.clock.now_millis(), ttl) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key, "cache entry expired");
            self.discard(key);
            return None;
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "cache entry undecodable, discarding");
                self.discard(key);
                None
            }
        }
    }

    fn discard(&self, key: &str) {
        if let Err(err) = self.backend.remove(key) {
            warn!(key, error = %err, "cache remove failed");
        }
    }
}
