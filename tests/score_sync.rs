use std::{sync::Arc, time::Duration};

use time::macros::datetime;
use tokio::sync::mpsc;

use score_sync::{
    clock::ManualClock,
    config::AppConfig,
    dao::{local_cache::MemoryCache, score_store::memory::MemoryScoreStore},
    domain::score::Direction,
    error::ServiceError,
    services::{
        commentary::StaticCommentator,
        feed_service::{FeedHandlers, subscribe},
        score_service,
        tiers::AppliedVia,
    },
    state::{AppState, SharedState},
};

struct Node {
    state: SharedState,
    clock: Arc<ManualClock>,
}

fn node() -> Node {
    let clock = Arc::new(ManualClock::new(datetime!(2026-10-19 09:30 UTC)));
    let state = AppState::new(
        AppConfig::default(),
        Arc::new(MemoryCache::new()),
        clock.clone(),
        Arc::new(StaticCommentator::default()),
    );
    Node { state, clock }
}

async fn online_node(store: &MemoryScoreStore) -> Node {
    let node = node();
    node.state.stores().install(Arc::new(store.clone())).await;
    node
}

#[tokio::test]
async fn last_history_entry_matches_the_returned_score() {
    let store = MemoryScoreStore::new();
    let node = online_node(&store).await;

    let response = score_service::mutate(&node.state, "203.0.113.7", Direction::Increase)
        .await
        .unwrap();
    let history = score_service::history_view(&node.state, None).await.unwrap();

    assert!(history.synchronized);
    assert_eq!(history.entries.last().unwrap().resulting_score, response.score);
    assert_eq!(response.applied_via, AppliedVia::Atomic);
}

#[tokio::test]
async fn cooldown_resets_to_full_window_and_then_counts_down() {
    let store = MemoryScoreStore::new();
    let node = online_node(&store).await;
    let actor = "203.0.113.8";

    score_service::mutate(&node.state, actor, Direction::Decrease)
        .await
        .unwrap();
    let fresh = score_service::score_view(&node.state, actor).await;
    node.clock.advance(Duration::from_secs(1));
    let later = score_service::score_view(&node.state, actor).await;

    assert_eq!(fresh.cooldown_remaining_ms, 300_000);
    assert_eq!(later.cooldown_remaining_ms, 299_000);

    let err = score_service::mutate(&node.state, actor, Direction::Increase)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::CooldownActive { remaining } if remaining == Duration::from_secs(299)
    ));
}

#[tokio::test]
async fn nodes_sharing_a_store_share_score_and_cooldowns() {
    let store = MemoryScoreStore::new();
    let left = online_node(&store).await;
    let right = online_node(&store).await;

    let applied = score_service::mutate(&left.state, "198.51.100.1", Direction::Increase)
        .await
        .unwrap();
    right.clock.advance(Duration::from_secs(30));

    let view = score_service::score_view(&right.state, "198.51.100.1").await;
    assert_eq!(view.score, applied.score);
    assert_eq!(view.cooldown_remaining_ms, 270_000);

    let err = score_service::mutate(&right.state, "198.51.100.1", Direction::Increase)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::CooldownActive { .. }));
}

#[tokio::test]
async fn offline_node_keeps_working_on_its_cache() {
    let node = node();
    assert!(node.state.is_degraded());

    let response = score_service::mutate(&node.state, "192.0.2.4", Direction::Increase)
        .await
        .unwrap();
    let view = score_service::score_view(&node.state, "192.0.2.4").await;

    assert_eq!(response.applied_via, AppliedVia::Local);
    assert!(!response.synchronized);
    assert!(!view.synchronized);
    assert_eq!(view.score, response.score);
    assert_eq!(view.history.last().unwrap().id, response.entry.id);
}

#[tokio::test]
async fn rate_split_conserves_the_total_swing() {
    let node = node();

    let rate = score_service::rate_view(&node.state);

    assert_eq!(rate.up_points + rate.down_points, 20);
    assert_eq!(rate.computed_for, "2026-10-19");
}

#[tokio::test]
async fn history_limit_outside_the_window_is_rejected() {
    let node = node();

    assert!(matches!(
        score_service::history_view(&node.state, Some(0)).await,
        Err(ServiceError::InvalidInput(_))
    ));
    assert!(matches!(
        score_service::history_view(&node.state, Some(51)).await,
        Err(ServiceError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn feed_subscribers_observe_mutations_until_unsubscribed() {
    let store = MemoryScoreStore::new();
    let node = online_node(&store).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = subscribe(
        node.state.feed(),
        FeedHandlers::new().on_score(move |score| {
            let _ = tx.send(score);
        }),
    );

    let response = score_service::mutate(&node.state, "192.0.2.9", Direction::Increase)
        .await
        .unwrap();
    let observed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap();
    assert_eq!(observed, Some(response.score));

    handle.unsubscribe();
    handle.unsubscribe();
    assert!(!handle.is_active());
}
