use std::sync::Arc;

use futures::StreamExt;
use tracing::{info, warn};

use crate::{
    dao::{
        local_cache::ScoreCache,
        score_store::{ScoreStore, StoreChange},
        storage::StorageError,
    },
    state::{FeedEvent, FeedHub},
};

/// Why a relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The store has no push channel; retrying is pointless.
    Unsupported,
    /// The push channel could not be opened.
    Failed,
    /// The push channel ended.
    Closed,
}

/// Relay the store's push channel onto the feed until it closes.
///
/// Pushed values also refresh the local cache, since the store wins over
/// whatever this node last saw. Stores without a push channel leave the feed
/// carrying only this node's own mutations.
pub async fn run(store: Arc<dyn ScoreStore>, cache: ScoreCache, feed: Arc<FeedHub>) -> RelayExit {
    let mut changes = match store.watch().await {
        Ok(changes) => changes,
        Err(err @ StorageError::Unsupported { .. }) => {
            info!(error = %err, "store has no push channel; feed carries local mutations only");
            return RelayExit::Unsupported;
        }
        Err(err) => {
            warn!(error = %err, "failed to open store push channel");
            return RelayExit::Failed;
        }
    };

    info!("relaying store changes to the feed");
    while let Some(change) = changes.next().await {
        match change {
            StoreChange::Score(score) => {
                if let Err(err) = cache.set_score(score) {
                    warn!(error = %err, "failed to cache pushed score");
                }
                feed.publish(FeedEvent::Score(score));
            }
            StoreChange::HistoryEntry(entry) => {
                if let Err(err) = cache.push_history(&entry) {
                    warn!(error = %err, "failed to cache pushed history entry");
                }
                feed.publish(FeedEvent::HistoryEntry(entry));
            }
        }
    }
    warn!("store push channel closed");
    RelayExit::Closed
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::macros::datetime;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        dao::{local_cache::MemoryCache, score_store::memory::MemoryScoreStore},
        domain::score::HistoryEntry,
    };

    #[tokio::test]
    async fn writes_from_other_nodes_reach_the_feed_and_cache() {
        let store = MemoryScoreStore::new();
        let cache = ScoreCache::new(Arc::new(MemoryCache::new()), 10);
        let feed = Arc::new(FeedHub::new(8));
        let mut events = feed.subscribe();

        let relay = tokio::spawn(run(Arc::new(store.clone()), cache.clone(), feed.clone()));
        // Let the relay open its watch before the remote write lands.
        while store.watch_subscribers() == 0 {
            tokio::task::yield_now().await;
        }

        let entry = HistoryEntry::new(7, 7, datetime!(2026-10-19 10:00 UTC));
        store.increment_score(7).await.unwrap();
        store.append_history(entry.clone()).await.unwrap();

        let wait = Duration::from_secs(2);
        assert_eq!(
            timeout(wait, events.recv()).await.unwrap().unwrap(),
            FeedEvent::Score(7)
        );
        assert_eq!(
            timeout(wait, events.recv()).await.unwrap().unwrap(),
            FeedEvent::HistoryEntry(entry.clone())
        );
        assert_eq!(cache.score(), Some(7));
        assert_eq!(cache.history(), vec![entry]);
        relay.abort();
    }

    #[tokio::test]
    async fn unreachable_store_ends_the_relay_quietly() {
        let store = MemoryScoreStore::new();
        store.set_reachable(false);
        let cache = ScoreCache::new(Arc::new(MemoryCache::new()), 10);
        let feed = Arc::new(FeedHub::new(8));

        let exit = timeout(Duration::from_secs(2), run(Arc::new(store), cache, feed))
            .await
            .unwrap();
        assert_eq!(exit, RelayExit::Failed);
    }
}
