//! In-process store used for development and tests.
//!
//! Besides behaving like a real backend it can be told to drop its atomic
//! primitive, go unreachable, fail history appends, or hold readers at a
//! barrier so read-modify-write races can be reproduced deterministically.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use time::OffsetDateTime;
use tokio::sync::{
    Barrier,
    broadcast::{self, error::RecvError},
};

use super::{ScoreStore, StoreChange, StoreChangeStream};
use crate::{
    dao::storage::{StorageError, StorageResult},
    domain::score::{CooldownRecord, HistoryEntry, keep_recent, sort_chronologically},
};

/// Entries kept before the oldest are discarded.
const HISTORY_RETENTION: usize = 1_000;
const CHANGE_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct MemoryScoreStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    score: Mutex<Option<i64>>,
    history: Mutex<Vec<HistoryEntry>>,
    cooldowns: DashMap<String, OffsetDateTime>,
    changes: broadcast::Sender<StoreChange>,
    atomic_enabled: AtomicBool,
    reachable: AtomicBool,
    fail_history: AtomicBool,
    history_failures_left: AtomicUsize,
    history_attempts: AtomicUsize,
    read_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl Default for MemoryScoreStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        let (changes, _receiver) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                score: Mutex::new(None),
                history: Mutex::new(Vec::new()),
                cooldowns: DashMap::new(),
                changes,
                atomic_enabled: AtomicBool::new(true),
                reachable: AtomicBool::new(true),
                fail_history: AtomicBool::new(false),
                history_failures_left: AtomicUsize::new(0),
                history_attempts: AtomicUsize::new(0),
                read_barrier: Mutex::new(None),
            }),
        }
    }

    /// Seed the score as if it had already been initialised.
    pub fn with_score(self, score: i64) -> Self {
        *lock(&self.inner.score) = Some(score);
        self
    }

    /// Toggle the atomic increment primitive.
    pub fn set_atomic_enabled(&self, enabled: bool) {
        self.inner.atomic_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Simulate losing (or regaining) the connection.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make history appends fail while the rest keeps working.
    pub fn set_history_failure(&self, fail: bool) {
        self.inner.fail_history.store(fail, Ordering::SeqCst);
    }

    /// Make only the next `count` history appends fail.
    pub fn fail_next_history_appends(&self, count: usize) {
        self.inner
            .history_failures_left
            .store(count, Ordering::SeqCst);
    }

    /// History appends received so far, failed ones included.
    pub fn history_attempts(&self) -> usize {
        self.inner.history_attempts.load(Ordering::SeqCst)
    }

    /// Make every `get_score` wait at `barrier` after taking its reading.
    pub fn hold_reads_at(&self, barrier: Option<Arc<Barrier>>) {
        *lock(&self.inner.read_barrier) = barrier;
    }

    /// Score as currently stored, without side effects.
    pub fn peek_score(&self) -> Option<i64> {
        *lock(&self.inner.score)
    }

    /// Number of open `watch` streams.
    pub fn watch_subscribers(&self) -> usize {
        self.inner.changes.receiver_count()
    }

    /// Full retained history, oldest first.
    pub fn peek_history(&self) -> Vec<HistoryEntry> {
        lock(&self.inner.history).clone()
    }
}

impl MemoryInner {
    fn ensure_reachable(&self) -> StorageResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable(
                "memory store is unreachable".into(),
                io::Error::new(io::ErrorKind::NotConnected, "simulated outage"),
            ))
        }
    }

    fn history_failure_due(&self) -> bool {
        self.fail_history.load(Ordering::SeqCst)
            || self
                .history_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
    }

    fn publish(&self, change: StoreChange) {
        let _ = self.changes.send(change);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScoreStore for MemoryScoreStore {
    fn get_score(&self) -> BoxFuture<'static, StorageResult<i64>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_reachable()?;
            let value = *lock(&inner.score).get_or_insert(0);
            let barrier = lock(&inner.read_barrier).clone();
            if let Some(barrier) = barrier {
                barrier.wait().await;
            }
            Ok(value)
        })
    }

    fn get_history(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<HistoryEntry>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_reachable()?;
            let entries = lock(&inner.history).clone();
            Ok(keep_recent(entries, limit))
        })
    }

    fn increment_score(&self, delta: i64) -> BoxFuture<'static, StorageResult<i64>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_reachable()?;
            if !inner.atomic_enabled.load(Ordering::SeqCst) {
                return Err(StorageError::unsupported("increment_score"));
            }
            let next = {
                let mut guard = lock(&inner.score);
                let next = guard.unwrap_or(0).saturating_add(delta);
                *guard = Some(next);
                next
            };
            inner.publish(StoreChange::Score(next));
            Ok(next)
        })
    }

    fn update_score(&self, value: i64) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_reachable()?;
            *lock(&inner.score) = Some(value);
            inner.publish(StoreChange::Score(value));
            Ok(())
        })
    }

    fn append_history(&self, entry: HistoryEntry) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.history_attempts.fetch_add(1, Ordering::SeqCst);
            inner.ensure_reachable()?;
            if inner.history_failure_due() {
                return Err(StorageError::unavailable(
                    "history append rejected".into(),
                    io::Error::other("simulated history failure"),
                ));
            }
            {
                let mut guard = lock(&inner.history);
                guard.push(entry.clone());
                sort_chronologically(&mut guard);
                if guard.len() > HISTORY_RETENTION {
                    let excess = guard.len() - HISTORY_RETENTION;
                    guard.drain(..excess);
                }
            }
            inner.publish(StoreChange::HistoryEntry(entry));
            Ok(())
        })
    }

    fn get_cooldown(
        &self,
        actor: &str,
    ) -> BoxFuture<'static, StorageResult<Option<OffsetDateTime>>> {
        let inner = self.inner.clone();
        let actor = actor.to_owned();
        Box::pin(async move {
            inner.ensure_reachable()?;
            Ok(inner.cooldowns.get(&actor).map(|at| *at))
        })
    }

    fn set_cooldown(&self, record: CooldownRecord) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_reachable()?;
            inner
                .cooldowns
                .insert(record.actor, record.last_mutation_at);
            Ok(())
        })
    }

    fn watch(&self) -> BoxFuture<'static, StorageResult<StoreChangeStream>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.ensure_reachable()?;
            let mut receiver = inner.changes.subscribe();
            let stream = async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(change) => yield change,
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            };
            Ok(Box::pin(stream) as StoreChangeStream)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ensure_reachable() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.health_check()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use time::macros::datetime;

    use super::*;

    #[tokio::test]
    async fn score_is_created_as_zero_on_first_read() {
        let store = MemoryScoreStore::new();
        assert_eq!(store.peek_score(), None);
        assert_eq!(store.get_score().await.unwrap(), 0);
        assert_eq!(store.peek_score(), Some(0));
    }

    #[tokio::test]
    async fn concurrent_increments_are_never_lost() {
        let store = MemoryScoreStore::new().with_score(100);
        let deltas = (1..=50).map(|i| if i % 3 == 0 { -i } else { i }).collect::<Vec<i64>>();

        let tasks = deltas
            .iter()
            .map(|delta| {
                let store = store.clone();
                let delta = *delta;
                tokio::spawn(async move { store.increment_score(delta).await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.peek_score(), Some(100 + deltas.iter().sum::<i64>()));
    }

    #[tokio::test]
    async fn disabled_atomic_primitive_reports_unsupported() {
        let store = MemoryScoreStore::new();
        store.set_atomic_enabled(false);
        assert!(matches!(
            store.increment_score(1).await,
            Err(StorageError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_store_fails_every_call() {
        let store = MemoryScoreStore::new();
        store.set_reachable(false);
        assert!(store.get_score().await.is_err());
        assert!(store.get_cooldown("a").await.is_err());
        assert!(store.watch().await.is_err());
    }

    #[tokio::test]
    async fn history_is_served_oldest_first_and_bounded() {
        let store = MemoryScoreStore::new();
        for i in 0..4 {
            let at = datetime!(2026-10-19 09:00 UTC) + std::time::Duration::from_secs(i as u64);
            store
                .append_history(HistoryEntry::new(1, i, at))
                .await
                .unwrap();
        }

        let recent = store.get_history(2).await.unwrap();
        assert_eq!(
            recent.iter().map(|e| e.resulting_score).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[tokio::test]
    async fn history_failures_can_be_limited_to_the_next_appends() {
        let store = MemoryScoreStore::new();
        store.fail_next_history_appends(1);
        let entry = HistoryEntry::new(1, 1, datetime!(2026-10-19 09:00 UTC));

        assert!(store.append_history(entry.clone()).await.is_err());
        store.append_history(entry.clone()).await.unwrap();

        assert_eq!(store.history_attempts(), 2);
        assert_eq!(store.peek_history(), vec![entry]);
    }

    #[tokio::test]
    async fn increments_saturate_instead_of_overflowing() {
        let store = MemoryScoreStore::new().with_score(i64::MAX - 1);
        assert_eq!(store.increment_score(5).await.unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn watchers_see_writes_from_any_handle() {
        let store = MemoryScoreStore::new();
        let mut changes = store.watch().await.unwrap();

        let other = store.clone();
        other.update_score(12).await.unwrap();

        assert_eq!(changes.next().await, Some(StoreChange::Score(12)));
    }
}
