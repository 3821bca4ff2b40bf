//! Device-scoped key-value cache.
//!
//! The cache holds a read-through, write-fallback copy of the remote score and
//! has no authority of its own: remote values overwrite it whenever they can be
//! read. It is also the cooldown source of truth while the remote store is out
//! of reach.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use indexmap::IndexMap;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

use crate::{
    dao::models::{HistoryEntity, RateEntity, from_unix_ms, to_unix_ms},
    domain::score::{HistoryEntry, RateSnapshot, keep_recent, sort_chronologically},
};

const SCORE_KEY: &str = "score";
const HISTORY_KEY: &str = "history";
const RATE_KEY: &str = "rate";
const LAST_MUTATION_KEY: &str = "last_mutation_at";
const COOLDOWNS_KEY: &str = "cooldowns";
/// Cooldown records older than this are dropped on the next cooldown write.
const DEFAULT_COOLDOWN_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Failure to persist a cache entry.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache file `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache file `{path}` is not valid JSON")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write cache file `{path}`")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode cache value for `{key}`")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache rejected write for `{key}`")]
    Rejected { key: String },
}

/// Synchronous string-keyed persistence with no cross-key transactions.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> Result<(), CacheError>;
}

/// Volatile cache, used in tests and when no cache file is configured.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, String>,
    reject_writes: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, simulating a full or read-only disk.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|value| value.clone())
    }

    fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Rejected { key: key.to_owned() });
        }
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }
}

/// JSON file cache rewritten atomically on every write.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    entries: Mutex<IndexMap<String, String>>,
}

impl FileCache {
    /// Open the cache at `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<IndexMap<String, String>>(&contents).map_err(
                |source| CacheError::Parse {
                    path: path.clone(),
                    source,
                },
            )?,
            Err(err) if err.kind() == ErrorKind::NotFound => IndexMap::new(),
            Err(source) => return Err(CacheError::Read { path, source }),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &IndexMap<String, String>) -> Result<(), CacheError> {
        let write_err = |source| CacheError::Write {
            path: self.path.clone(),
            source,
        };
        let encoded = serde_json::to_vec_pretty(entries).map_err(|source| CacheError::Encode {
            key: "*".into(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, encoded).map_err(write_err)?;
        fs::rename(&staging, &self.path).map_err(write_err)
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        let guard = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut guard = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = guard.insert(key.to_owned(), value);
        if let Err(err) = self.flush(&guard) {
            match previous {
                Some(previous) => guard.insert(key.to_owned(), previous),
                None => guard.shift_remove(key),
            };
            return Err(err);
        }
        Ok(())
    }
}

/// Typed view over a [`LocalCache`] holding the score-related keys.
#[derive(Clone)]
pub struct ScoreCache {
    inner: Arc<dyn LocalCache>,
    history_limit: usize,
    cooldown_retention: Duration,
}

impl ScoreCache {
    pub fn new(inner: Arc<dyn LocalCache>, history_limit: usize) -> Self {
        Self {
            inner,
            history_limit: history_limit.max(1),
            cooldown_retention: DEFAULT_COOLDOWN_RETENTION,
        }
    }

    /// Keep cooldown records for `retention` after their mutation; should be
    /// at least the cooldown window.
    pub fn with_cooldown_retention(mut self, retention: Duration) -> Self {
        self.cooldown_retention = retention;
        self
    }

    /// Number of history entries the cache keeps.
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Last known score, if any was ever cached.
    pub fn score(&self) -> Option<i64> {
        self.read_parsed(SCORE_KEY)
    }

    pub fn set_score(&self, score: i64) -> Result<(), CacheError> {
        self.inner.set(SCORE_KEY, score.to_string())
    }

    /// Cached recent history in chronological order.
    pub fn history(&self) -> Vec<HistoryEntry> {
        let Some(raw) = self.inner.get(HISTORY_KEY) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<HistoryEntity>>(&raw) {
            Ok(entities) => entities
                .into_iter()
                .filter_map(|entity| match HistoryEntry::try_from(entity) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!(error = %err, "dropping corrupt cached history entry");
                        None
                    }
                })
                .collect(),
            Err(err) => {
                warn!(error = %err, "cached history is unreadable; ignoring it");
                Vec::new()
            }
        }
    }

    /// Replace the cached history window, keeping only the most recent entries.
    pub fn replace_history(&self, entries: &[HistoryEntry]) -> Result<(), CacheError> {
        let start = entries.len().saturating_sub(self.history_limit);
        let entities = entries[start..]
            .iter()
            .map(HistoryEntity::from)
            .collect::<Vec<_>>();
        self.write_json(HISTORY_KEY, &entities)
    }

    /// Append one entry to the cached window.
    pub fn push_history(&self, entry: &HistoryEntry) -> Result<(), CacheError> {
        let mut entries = self.history();
        if entries.iter().any(|existing| existing.id == entry.id) {
            return Ok(());
        }
        entries.push(entry.clone());
        // Entries relayed from other nodes may arrive late.
        sort_chronologically(&mut entries);
        let entries = keep_recent(entries, self.history_limit);
        self.replace_history(&entries)
    }

    /// Last rate snapshot this device derived.
    pub fn rate(&self) -> Option<RateSnapshot> {
        let raw = self.inner.get(RATE_KEY)?;
        let entity = serde_json::from_str::<RateEntity>(&raw).ok()?;
        RateSnapshot::try_from(entity).ok()
    }

    pub fn set_rate(&self, snapshot: &RateSnapshot) -> Result<(), CacheError> {
        self.write_json(RATE_KEY, &RateEntity::from(snapshot))
    }

    /// Instant of the last mutation applied through this device.
    pub fn last_mutation_at(&self) -> Option<OffsetDateTime> {
        self.read_instant(LAST_MUTATION_KEY)
    }

    pub fn set_last_mutation_at(&self, at: OffsetDateTime) -> Result<(), CacheError> {
        self.inner.set(LAST_MUTATION_KEY, to_unix_ms(at).to_string())
    }

    /// Cooldown timestamp recorded locally for `actor`.
    pub fn cooldown(&self, actor: &str) -> Option<OffsetDateTime> {
        let millis = *self.cooldowns().get(actor)?;
        from_unix_ms(millis).ok()
    }

    /// Record `actor`'s mutation at `at`, dropping records whose retention ran out by then.
    pub fn set_cooldown(&self, actor: &str, at: OffsetDateTime) -> Result<(), CacheError> {
        let now_ms = to_unix_ms(at);
        let retention_ms = i64::try_from(self.cooldown_retention.as_millis()).unwrap_or(i64::MAX);
        let oldest_kept = now_ms.saturating_sub(retention_ms);

        let mut cooldowns = self.cooldowns();
        cooldowns.retain(|_, last| *last > oldest_kept);
        cooldowns.insert(actor.to_owned(), now_ms);
        self.write_json(COOLDOWNS_KEY, &cooldowns)
    }

    /// Number of actors with a retained local cooldown record.
    pub fn cooldown_count(&self) -> usize {
        self.cooldowns().len()
    }

    fn cooldowns(&self) -> IndexMap<String, i64> {
        let Some(raw) = self.inner.get(COOLDOWNS_KEY) else {
            return IndexMap::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(error = %err, "cached cooldowns are unreadable; ignoring them");
            IndexMap::new()
        })
    }

    fn read_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.inner.get(key)?.trim().parse().ok()
    }

    fn read_instant(&self, key: &str) -> Option<OffsetDateTime> {
        from_unix_ms(self.read_parsed(key)?).ok()
    }

    fn write_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let encoded = serde_json::to_string(value).map_err(|source| CacheError::Encode {
            key: key.to_owned(),
            source,
        })?;
        self.inner.set(key, encoded)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use super::*;

    fn cache(limit: usize) -> (Arc<MemoryCache>, ScoreCache) {
        let raw = Arc::new(MemoryCache::new());
        (raw.clone(), ScoreCache::new(raw, limit))
    }

    #[test]
    fn empty_cache_has_no_values() {
        let (_, cache) = cache(10);
        assert_eq!(cache.score(), None);
        assert!(cache.history().is_empty());
        assert_eq!(cache.rate(), None);
        assert_eq!(cache.cooldown("10.0.0.1"), None);
    }

    #[test]
    fn history_window_is_bounded() {
        let (_, cache) = cache(3);
        for score in 1..=5 {
            let entry = HistoryEntry::new(1, score, datetime!(2026-10-19 10:00 UTC));
            cache.push_history(&entry).unwrap();
        }

        let scores = cache
            .history()
            .iter()
            .map(|entry| entry.resulting_score)
            .collect::<Vec<_>>();
        assert_eq!(scores, vec![3, 4, 5]);
    }

    #[test]
    fn pushing_the_same_entry_twice_is_a_no_op() {
        let (_, cache) = cache(10);
        let entry = HistoryEntry::new(5, 5, datetime!(2026-10-19 10:00 UTC));
        cache.push_history(&entry).unwrap();
        cache.push_history(&entry).unwrap();
        assert_eq!(cache.history().len(), 1);
    }

    #[test]
    fn cooldowns_are_kept_per_actor() {
        let (_, cache) = cache(10);
        let at = datetime!(2026-10-19 10:00:00.5 UTC);
        cache.set_cooldown("a", at).unwrap();

        assert_eq!(cache.cooldown("a"), Some(at));
        assert_eq!(cache.cooldown("b"), None);
    }

    #[test]
    fn expired_cooldowns_are_dropped_on_the_next_write() {
        let (_, cache) = cache(10);
        let cache = cache.with_cooldown_retention(Duration::from_secs(300));
        for i in 0..2_000 {
            let actor = format!("10.1.{}.{}", i / 256, i % 256);
            cache
                .set_cooldown(&actor, datetime!(2020-01-01 00:00 UTC))
                .unwrap();
        }
        cache
            .set_cooldown("10.0.0.9", datetime!(2026-10-19 11:58 UTC))
            .unwrap();

        cache
            .set_cooldown("10.0.0.1", datetime!(2026-10-19 12:00 UTC))
            .unwrap();

        assert_eq!(cache.cooldown_count(), 2);
        assert_eq!(cache.cooldown("10.1.0.1"), None);
        assert_eq!(cache.cooldown("10.0.0.9"), Some(datetime!(2026-10-19 11:58 UTC)));
    }

    #[test]
    fn late_history_entries_keep_the_window_chronological() {
        let (_, cache) = cache(2);
        let early = HistoryEntry::new(1, 1, datetime!(2026-10-19 10:00 UTC));
        let middle = HistoryEntry::new(1, 2, datetime!(2026-10-19 10:01 UTC));
        let late = HistoryEntry::new(1, 3, datetime!(2026-10-19 10:02 UTC));

        cache.push_history(&late).unwrap();
        cache.push_history(&early).unwrap();
        cache.push_history(&middle).unwrap();

        assert_eq!(cache.history(), vec![middle, late]);
    }

    #[test]
    fn rejected_writes_surface_as_errors() {
        let (raw, cache) = cache(10);
        raw.set_reject_writes(true);
        assert!(matches!(cache.set_score(3), Err(CacheError::Rejected { .. })));
        assert_eq!(cache.score(), None);
    }

    #[test]
    fn garbage_values_read_as_missing() {
        let (raw, cache) = cache(10);
        raw.set(SCORE_KEY, "not-a-number".into()).unwrap();
        raw.set(RATE_KEY, "{}".into()).unwrap();
        assert_eq!(cache.score(), None);
        assert_eq!(cache.rate(), None);
    }

    #[test]
    fn file_cache_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "score-sync-cache-{}.json",
            uuid::Uuid::new_v4().simple()
        ));
        {
            let file = Arc::new(FileCache::open(&path).unwrap());
            let cache = ScoreCache::new(file, 10);
            cache.set_score(-7).unwrap();
            cache
                .set_rate(&RateSnapshot {
                    value: 0.4,
                    computed_for: date!(2026 - 10 - 19),
                })
                .unwrap();
        }

        let reopened = ScoreCache::new(Arc::new(FileCache::open(&path).unwrap()), 10);
        assert_eq!(reopened.score(), Some(-7));
        assert_eq!(reopened.rate().map(|r| r.value), Some(0.4));

        let _ = fs::remove_file(&path);
    }
}
