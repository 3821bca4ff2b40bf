//! Sole writer of the shared score.
//!
//! A mutation goes through the cooldown guard, picks its magnitude from the
//! current rate, commits through the [`TierChain`] and then runs its
//! continuations: history append, cache mirror and cooldown records. The
//! continuations are retried once each and only logged when they still fail;
//! the committed score is never rolled back.

use std::{fmt::Display, future::Future, sync::Arc, time::Duration};

use dashmap::DashSet;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    dao::{
        local_cache::{CacheError, ScoreCache},
        score_store::ScoreStore,
        storage::StorageError,
    },
    domain::{
        rate::point_value,
        score::{CooldownRecord, Direction, HistoryEntry, RateSnapshot, keep_recent},
    },
    services::{
        cooldown::CooldownGuard,
        rate_service::RateService,
        tiers::{AppliedVia, TierChain, TierError},
    },
    state::{FeedEvent, FeedHub, StoreSlot},
};

/// Why a mutation was not applied.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The actor mutated too recently; nothing was written.
    #[error("cooldown active for another {}ms", remaining.as_millis())]
    CooldownActive { remaining: Duration },
    /// The same actor already has a mutation outstanding.
    #[error("a mutation by `{actor}` is already in flight")]
    MutationInFlight { actor: String },
    /// The fallback write kept conflicting after its retry.
    #[error("score write conflicted")]
    WriteConflict(#[source] StorageError),
    /// No tier could be reached at all.
    ///
    /// Only a chain without a local tier ends this way. The engine's own chain
    /// always ends with the cache, so an unreachable store shows up as
    /// [`MutationOutcome::synchronized`] being `false` instead.
    #[error("score store unreachable")]
    StoreUnreachable(#[source] StorageError),
    /// Every tier failed, including the local cache.
    #[error("score could not be persisted")]
    PersistenceFailure(#[source] CacheError),
}

impl From<TierError> for SyncError {
    fn from(err: TierError) -> Self {
        match err {
            TierError::Unavailable(source) => SyncError::StoreUnreachable(source),
            TierError::Conflict(source) => SyncError::WriteConflict(source),
            TierError::Persistence(source) => SyncError::PersistenceFailure(source),
        }
    }
}

/// Result of an accepted mutation. Authoritative for the caller's own action.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub new_score: i64,
    pub entry: HistoryEntry,
    pub applied_via: AppliedVia,
    /// `false` when only the local cache saw the mutation.
    pub synchronized: bool,
    /// `false` when the history append failed after its retry.
    pub history_recorded: bool,
    pub rate: RateSnapshot,
}

/// Value read through the store, falling back to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadThrough<T> {
    pub value: T,
    /// `true` when `value` came from the shared store.
    pub synchronized: bool,
}

/// Orchestrates mutations and read-through views of the score.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    stores: StoreSlot,
    cache: ScoreCache,
    rates: RateService,
    feed: Arc<FeedHub>,
    clock: Arc<dyn Clock>,
    cooldown: CooldownGuard,
    in_flight: DashSet<String>,
}

/// Marks an actor busy until dropped.
struct InFlight<'a> {
    actors: &'a DashSet<String>,
    actor: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.actors.remove(&self.actor);
    }
}

impl SyncEngine {
    pub fn new(
        stores: StoreSlot,
        cache: ScoreCache,
        rates: RateService,
        feed: Arc<FeedHub>,
        clock: Arc<dyn Clock>,
        cooldown_window: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                stores,
                cache,
                rates,
                feed,
                clock,
                cooldown: CooldownGuard::new(cooldown_window),
                in_flight: DashSet::new(),
            }),
        }
    }

    pub fn cooldown_window(&self) -> Duration {
        self.inner.cooldown.window()
    }

    /// Apply one increase or decrease on behalf of `actor`.
    pub async fn apply_mutation(
        &self,
        actor: &str,
        direction: Direction,
    ) -> Result<MutationOutcome, SyncError> {
        let _in_flight = self.claim(actor)?;
        let inner = &self.inner;
        let store = inner.stores.current().await;

        let remaining = inner
            .cooldown
            .remaining(actor, inner.clock.now(), &inner.cache, store.as_deref())
            .await;
        if !remaining.is_zero() {
            debug!(actor, remaining_ms = remaining.as_millis() as u64, "cooldown active");
            return Err(SyncError::CooldownActive { remaining });
        }

        let rate = inner.rates.snapshot_at(inner.clock.now());
        let delta = point_value(direction, rate.value);

        let committed = TierChain::for_store(store.clone(), inner.cache.clone())
            .apply(delta)
            .await
            .inspect_err(|err| warn!(actor, delta, error = %err, "mutation failed"))?;
        let committed_at = inner.clock.now();
        let synchronized = committed.via != AppliedVia::Local;
        let entry = HistoryEntry::new(delta, committed.new_score, committed_at);

        let remote = store.filter(|_| synchronized);
        let history_recorded = self.record_history(remote.as_deref(), &entry).await;
        self.mirror_to_cache(committed.new_score, committed.via, committed_at);
        self.record_cooldown(remote.as_deref(), actor, committed_at)
            .await;

        inner.feed.publish(FeedEvent::Score(committed.new_score));
        inner.feed.publish(FeedEvent::HistoryEntry(entry.clone()));

        info!(
            actor,
            %direction,
            delta,
            score = committed.new_score,
            tier = ?committed.via,
            "mutation applied"
        );

        Ok(MutationOutcome {
            new_score: committed.new_score,
            entry,
            applied_via: committed.via,
            synchronized,
            history_recorded,
            rate,
        })
    }

    /// Remaining cooldown of `actor` right now.
    pub async fn cooldown_remaining(&self, actor: &str) -> Duration {
        let inner = &self.inner;
        let store = inner.stores.current().await;
        inner
            .cooldown
            .remaining(actor, inner.clock.now(), &inner.cache, store.as_deref())
            .await
    }

    /// Current score; a successful remote read overwrites the cached one.
    pub async fn read_score(&self) -> ReadThrough<i64> {
        let inner = &self.inner;
        if let Some(store) = inner.stores.current().await {
            match store.get_score().await {
                Ok(score) => {
                    if let Err(err) = inner.cache.set_score(score) {
                        warn!(error = %err, "failed to mirror remote score to cache");
                    }
                    return ReadThrough {
                        value: score,
                        synchronized: true,
                    };
                }
                Err(err) => warn!(error = %err, "remote score unreadable; serving cached value"),
            }
        }

        ReadThrough {
            value: inner.cache.score().unwrap_or(0),
            synchronized: false,
        }
    }

    /// Up to `limit` most recent history entries, oldest first.
    pub async fn read_history(&self, limit: usize) -> ReadThrough<Vec<HistoryEntry>> {
        let inner = &self.inner;
        if let Some(store) = inner.stores.current().await {
            let window = inner.cache.history_limit().max(limit);
            match store.get_history(window).await {
                Ok(entries) => {
                    if let Err(err) = inner.cache.replace_history(&entries) {
                        warn!(error = %err, "failed to mirror remote history to cache");
                    }
                    return ReadThrough {
                        value: keep_recent(entries, limit),
                        synchronized: true,
                    };
                }
                Err(err) => warn!(error = %err, "remote history unreadable; serving cached window"),
            }
        }

        ReadThrough {
            value: keep_recent(inner.cache.history(), limit),
            synchronized: false,
        }
    }

    fn claim(&self, actor: &str) -> Result<InFlight<'_>, SyncError> {
        if !self.inner.in_flight.insert(actor.to_owned()) {
            return Err(SyncError::MutationInFlight {
                actor: actor.to_owned(),
            });
        }
        Ok(InFlight {
            actors: &self.inner.in_flight,
            actor: actor.to_owned(),
        })
    }

    async fn record_history(&self, remote: Option<&dyn ScoreStore>, entry: &HistoryEntry) -> bool {
        let cached = retry_cache("history", || self.inner.cache.push_history(entry));
        match remote {
            Some(store) => retry_once("history append", || store.append_history(entry.clone()))
                .await
                .is_ok(),
            None => cached,
        }
    }

    fn mirror_to_cache(&self, score: i64, via: AppliedVia, at: OffsetDateTime) {
        let cache = &self.inner.cache;
        if via != AppliedVia::Local {
            retry_cache("score", || cache.set_score(score));
        }
        retry_cache("last mutation", || cache.set_last_mutation_at(at));
    }

    async fn record_cooldown(&self, remote: Option<&dyn ScoreStore>, actor: &str, at: OffsetDateTime) {
        retry_cache("cooldown", || self.inner.cache.set_cooldown(actor, at));
        if let Some(store) = remote {
            let _ = retry_once("cooldown write", || {
                store.set_cooldown(CooldownRecord {
                    actor: actor.to_owned(),
                    last_mutation_at: at,
                })
            })
            .await;
        }
    }
}

/// Run a remote continuation, retrying it once before logging the failure.
async fn retry_once<T, E, F, Fut>(what: &'static str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(err) => {
            debug!(what, error = %err, "continuation failed; retrying once");
            op().await
                .inspect_err(|err| warn!(what, error = %err, "continuation failed after retry"))
        }
    }
}

/// Cache counterpart of [`retry_once`]; reports whether the write landed.
fn retry_cache(what: &'static str, op: impl Fn() -> Result<(), CacheError>) -> bool {
    op().or_else(|_| op())
        .inspect_err(|err| warn!(what, error = %err, "cache write failed after retry"))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{
        clock::ManualClock,
        dao::{local_cache::MemoryCache, score_store::memory::MemoryScoreStore},
        domain::rate::point_split,
    };

    struct Fixture {
        engine: SyncEngine,
        stores: StoreSlot,
        raw_cache: Arc<MemoryCache>,
        cache: ScoreCache,
        clock: Arc<ManualClock>,
        feed: Arc<FeedHub>,
    }

    fn fixture() -> Fixture {
        let raw_cache = Arc::new(MemoryCache::new());
        let cache = ScoreCache::new(raw_cache.clone(), 20);
        let stores = StoreSlot::new();
        let clock = Arc::new(ManualClock::new(datetime!(2026-10-19 12:00 UTC)));
        let feed = Arc::new(FeedHub::new(16));
        let rates = RateService::new(time::UtcOffset::UTC, cache.clone());
        let engine = SyncEngine::new(
            stores.clone(),
            cache.clone(),
            rates,
            feed.clone(),
            clock.clone(),
            Duration::from_secs(300),
        );
        Fixture {
            engine,
            stores,
            raw_cache,
            cache,
            clock,
            feed,
        }
    }

    fn expected_delta(fixture: &Fixture, direction: Direction) -> i64 {
        let rate = crate::domain::rate::current_rate(fixture.clock.now().date());
        point_split(rate).delta(direction)
    }

    #[tokio::test]
    async fn atomic_mutation_updates_every_view() {
        let fx = fixture();
        let store = MemoryScoreStore::new();
        fx.stores.install(Arc::new(store.clone())).await;
        let mut feed = fx.feed.subscribe();

        let outcome = fx.engine.apply_mutation("10.0.0.1", Direction::Increase).await.unwrap();

        let delta = expected_delta(&fx, Direction::Increase);
        assert_eq!(outcome.new_score, delta);
        assert_eq!(outcome.applied_via, AppliedVia::Atomic);
        assert!(outcome.synchronized && outcome.history_recorded);
        assert_eq!(store.peek_score(), Some(delta));
        assert_eq!(store.peek_history().last(), Some(&outcome.entry));
        assert_eq!(fx.cache.score(), Some(delta));
        assert_eq!(fx.cache.cooldown("10.0.0.1"), Some(fx.clock.now()));
        assert_eq!(feed.recv().await.unwrap(), FeedEvent::Score(delta));
        assert_eq!(
            feed.recv().await.unwrap(),
            FeedEvent::HistoryEntry(outcome.entry.clone())
        );
    }

    #[tokio::test]
    async fn second_mutation_inside_window_is_rejected_without_writes() {
        let fx = fixture();
        let store = MemoryScoreStore::new();
        fx.stores.install(Arc::new(store.clone())).await;

        fx.engine.apply_mutation("a", Direction::Decrease).await.unwrap();
        let score = store.peek_score();
        fx.clock.advance(Duration::from_secs(1));

        let err = fx.engine.apply_mutation("a", Direction::Increase).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::CooldownActive { remaining } if remaining == Duration::from_secs(299)
        ));
        assert_eq!(store.peek_score(), score);
        assert_eq!(store.peek_history().len(), 1);
    }

    #[tokio::test]
    async fn other_actors_are_not_throttled() {
        let fx = fixture();
        fx.stores.install(Arc::new(MemoryScoreStore::new())).await;

        fx.engine.apply_mutation("a", Direction::Increase).await.unwrap();
        fx.engine.apply_mutation("b", Direction::Increase).await.unwrap();
    }

    #[tokio::test]
    async fn degraded_mode_applies_locally() {
        let fx = fixture();
        fx.cache.set_score(40).unwrap();

        let outcome = fx.engine.apply_mutation("a", Direction::Increase).await.unwrap();

        assert_eq!(outcome.applied_via, AppliedVia::Local);
        assert!(!outcome.synchronized);
        assert_eq!(outcome.new_score, 40 + expected_delta(&fx, Direction::Increase));
        assert_eq!(fx.cache.score(), Some(outcome.new_score));
        assert_eq!(fx.cache.history().last(), Some(&outcome.entry));
    }

    #[tokio::test]
    async fn history_failure_does_not_roll_back_the_score() {
        let fx = fixture();
        let store = MemoryScoreStore::new().with_score(5);
        store.set_history_failure(true);
        fx.stores.install(Arc::new(store.clone())).await;

        let outcome = fx.engine.apply_mutation("a", Direction::Increase).await.unwrap();

        assert!(!outcome.history_recorded);
        assert_eq!(store.history_attempts(), 2);
        assert_eq!(store.peek_score(), Some(outcome.new_score));
        assert!(store.peek_history().is_empty());
    }

    #[tokio::test]
    async fn single_history_failure_is_retried() {
        let fx = fixture();
        let store = MemoryScoreStore::new();
        store.fail_next_history_appends(1);
        fx.stores.install(Arc::new(store.clone())).await;

        let outcome = fx.engine.apply_mutation("a", Direction::Increase).await.unwrap();

        assert!(outcome.history_recorded);
        assert_eq!(store.history_attempts(), 2);
        assert_eq!(store.peek_history(), vec![outcome.entry]);
    }

    #[tokio::test]
    async fn remote_continuations_run_at_most_twice() {
        let attempts = std::sync::atomic::AtomicUsize::new(0);

        let result: Result<(), &str> = retry_once("test", || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.into_inner(), 2);
    }

    #[tokio::test]
    async fn successful_continuation_is_not_repeated() {
        let attempts = std::sync::atomic::AtomicUsize::new(0);

        let result: Result<u8, &str> = retry_once("test", || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok(1) }
        })
        .await;

        assert_eq!(result, Ok(1));
        assert_eq!(attempts.into_inner(), 1);
    }

    #[test]
    fn cache_continuations_run_at_most_twice() {
        let attempts = std::cell::Cell::new(0);
        let landed = retry_cache("test", || {
            attempts.set(attempts.get() + 1);
            Err(CacheError::Rejected { key: "k".into() })
        });
        assert!(!landed);
        assert_eq!(attempts.get(), 2);

        let attempts = std::cell::Cell::new(0);
        let landed = retry_cache("test", || {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                Err(CacheError::Rejected { key: "k".into() })
            } else {
                Ok(())
            }
        });
        assert!(landed);
        assert_eq!(attempts.get(), 2);
    }

    #[tokio::test]
    async fn local_persistence_failure_is_terminal_when_offline() {
        let fx = fixture();
        fx.raw_cache.set_reject_writes(true);

        let err = fx.engine.apply_mutation("a", Direction::Increase).await.unwrap_err();

        assert!(matches!(err, SyncError::PersistenceFailure(_)));
    }

    #[tokio::test]
    async fn cache_mirror_failure_is_not_fatal_when_online() {
        let fx = fixture();
        let store = MemoryScoreStore::new();
        fx.stores.install(Arc::new(store.clone())).await;
        fx.raw_cache.set_reject_writes(true);

        let outcome = fx.engine.apply_mutation("a", Direction::Decrease).await.unwrap();

        assert_eq!(store.peek_score(), Some(outcome.new_score));
    }

    #[tokio::test]
    async fn reads_prefer_the_store_and_refresh_the_cache() {
        let fx = fixture();
        fx.cache.set_score(1).unwrap();
        fx.stores
            .install(Arc::new(MemoryScoreStore::new().with_score(77)))
            .await;

        let read = fx.engine.read_score().await;

        assert_eq!(read, ReadThrough { value: 77, synchronized: true });
        assert_eq!(fx.cache.score(), Some(77));
    }

    #[tokio::test]
    async fn reads_fall_back_to_the_cache() {
        let fx = fixture();
        let store = MemoryScoreStore::new().with_score(77);
        store.set_reachable(false);
        fx.stores.install(Arc::new(store)).await;
        fx.cache.set_score(3).unwrap();

        assert_eq!(
            fx.engine.read_score().await,
            ReadThrough { value: 3, synchronized: false }
        );
    }

    #[tokio::test]
    async fn concurrent_atomic_mutations_sum_exactly() {
        let fx = fixture();
        let store = MemoryScoreStore::new().with_score(100);
        fx.stores.install(Arc::new(store.clone())).await;

        let actors: Vec<String> = (0..8).map(|i| format!("10.0.0.{i}")).collect();
        let results = futures::future::join_all(actors.iter().enumerate().map(|(i, actor)| {
            let direction = if i % 2 == 0 {
                Direction::Increase
            } else {
                Direction::Decrease
            };
            fx.engine.apply_mutation(actor, direction)
        }))
        .await;

        let up = expected_delta(&fx, Direction::Increase);
        let down = expected_delta(&fx, Direction::Decrease);
        assert!(results.iter().all(|result| result.is_ok()));
        assert_eq!(store.peek_score(), Some(100 + 4 * up + 4 * down));
        assert_eq!(store.peek_history().len(), 8);
    }

    #[tokio::test]
    async fn racing_fallback_writers_settle_on_one_of_the_two_writes() {
        let fx = fixture();
        let store = MemoryScoreStore::new().with_score(50);
        store.set_atomic_enabled(false);
        store.hold_reads_at(Some(Arc::new(tokio::sync::Barrier::new(2))));
        fx.stores.install(Arc::new(store.clone())).await;

        let (first, second) = tokio::join!(
            fx.engine.apply_mutation("a", Direction::Increase),
            fx.engine.apply_mutation("b", Direction::Decrease),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.applied_via, AppliedVia::ReadModifyWrite);
        assert_eq!(second.applied_via, AppliedVia::ReadModifyWrite);
        let up = 50 + expected_delta(&fx, Direction::Increase);
        let down = 50 + expected_delta(&fx, Direction::Decrease);
        let settled = store.peek_score().unwrap();
        assert!(settled == up || settled == down, "unexpected score {settled}");
    }

    #[tokio::test]
    async fn remote_cooldown_survives_a_fresh_cache() {
        let store = MemoryScoreStore::new();
        let first = fixture();
        first.stores.install(Arc::new(store.clone())).await;
        first.engine.apply_mutation("a", Direction::Increase).await.unwrap();

        let second = fixture();
        second.stores.install(Arc::new(store.clone())).await;
        second.clock.advance(Duration::from_secs(10));

        let err = second.engine.apply_mutation("a", Direction::Increase).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::CooldownActive { remaining } if remaining == Duration::from_secs(290)
        ));
        assert_eq!(second.engine.cooldown_remaining("a").await, Duration::from_secs(290));
    }

    #[tokio::test]
    async fn outstanding_mutation_blocks_the_same_actor() {
        let fx = fixture();
        let _guard = fx.engine.claim("a").unwrap();

        let err = fx.engine.apply_mutation("a", Direction::Increase).await.unwrap_err();

        assert!(matches!(err, SyncError::MutationInFlight { actor } if actor == "a"));
        assert_eq!(fx.cache.score(), None);
    }

    #[test]
    fn in_flight_marker_is_released_on_drop() {
        let fx = fixture();
        {
            let _guard = fx.engine.claim("a").unwrap();
            assert!(matches!(
                fx.engine.claim("a"),
                Err(SyncError::MutationInFlight { .. })
            ));
            assert!(fx.engine.claim("b").is_ok());
        }
        assert!(fx.engine.claim("a").is_ok());
    }

    #[test]
    fn every_tier_error_maps_to_a_sync_error() {
        let err: SyncError = TierError::Conflict(StorageError::conflict("x")).into();
        assert!(matches!(err, SyncError::WriteConflict(_)));
        let err: SyncError = TierError::Unavailable(StorageError::unsupported("x")).into();
        assert!(matches!(err, SyncError::StoreUnreachable(_)));
    }
}
