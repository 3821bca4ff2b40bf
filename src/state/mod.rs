pub mod feed;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    clock::Clock,
    config::AppConfig,
    dao::{
        local_cache::{LocalCache, ScoreCache},
        score_store::ScoreStore,
    },
    services::{commentary::Commentator, rate_service::RateService, sync_engine::SyncEngine},
};

pub use self::feed::{FeedEvent, FeedHub};

pub type SharedState = Arc<AppState>;

/// Slot holding the shared store, shared between the application state and the sync engine.
///
/// The node starts degraded until a store is installed, and goes back to degraded
/// whenever the supervisor loses the connection.
#[derive(Clone)]
pub struct StoreSlot {
    inner: Arc<StoreSlotInner>,
}

struct StoreSlotInner {
    store: RwLock<Option<Arc<dyn ScoreStore>>>,
    degraded: watch::Sender<bool>,
}

impl Default for StoreSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSlot {
    pub fn new() -> Self {
        let (degraded, _rx) = watch::channel(true);
        Self {
            inner: Arc::new(StoreSlotInner {
                store: RwLock::new(None),
                degraded,
            }),
        }
    }

    /// Store to use right now; `None` while degraded.
    pub async fn current(&self) -> Option<Arc<dyn ScoreStore>> {
        if self.is_degraded() {
            return None;
        }
        self.installed().await
    }

    /// Installed store regardless of the degraded flag.
    pub async fn installed(&self) -> Option<Arc<dyn ScoreStore>> {
        let guard = self.inner.store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn install(&self, store: Arc<dyn ScoreStore>) {
        {
            let mut guard = self.inner.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear(&self) {
        {
            let mut guard = self.inner.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.inner.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.inner.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.inner.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}

/// Central application state shared by every route and background task.
pub struct AppState {
    config: AppConfig,
    stores: StoreSlot,
    cache: ScoreCache,
    feed: Arc<FeedHub>,
    rates: RateService,
    engine: SyncEngine,
    clock: Arc<dyn Clock>,
    commentator: Arc<dyn Commentator>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a store is installed.
    pub fn new(
        config: AppConfig,
        cache: Arc<dyn LocalCache>,
        clock: Arc<dyn Clock>,
        commentator: Arc<dyn Commentator>,
    ) -> SharedState {
        let stores = StoreSlot::new();
        let cache = ScoreCache::new(cache, config.history_limit)
            .with_cooldown_retention(config.cooldown_window);
        let feed = Arc::new(FeedHub::new(config.feed_capacity));
        let rates = RateService::new(config.rate_offset(), cache.clone());
        let engine = SyncEngine::new(
            stores.clone(),
            cache.clone(),
            rates.clone(),
            feed.clone(),
            clock.clone(),
            config.cooldown_window,
        );

        Arc::new(Self {
            config,
            stores,
            cache,
            feed,
            rates,
            engine,
            clock,
            commentator,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Slot of the shared store.
    pub fn stores(&self) -> &StoreSlot {
        &self.stores
    }

    /// Device-local cache of the score.
    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }

    /// Broadcast hub of the change feed.
    pub fn feed(&self) -> &Arc<FeedHub> {
        &self.feed
    }

    pub fn rates(&self) -> &RateService {
        &self.rates
    }

    /// The only writer of the score.
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn commentator(&self) -> &Arc<dyn Commentator> {
        &self.commentator
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        self.stores.is_degraded()
    }
}
