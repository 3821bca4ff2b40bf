use std::{future::Future, sync::Arc, time::Duration};

use rand::Rng;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{info, warn};

use crate::{
    dao::{score_store::ScoreStore, storage::StorageError},
    services::feed_relay::{self, RelayExit},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the score store, keep the node in degraded mode while it is
/// unreachable, and keep the feed relay attached to the live connection.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn ScoreStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.stores().install(store.clone()).await;
                info!("score store connected; leaving degraded mode");
                delay = INITIAL_DELAY;
                let mut relay = Some(spawn_relay(&state, store.clone()));

                loop {
                    match store.health_check().await {
                        Ok(()) => {
                            if state.is_degraded() {
                                info!("score store healthy again; leaving degraded mode");
                                state.stores().update_degraded(false);
                            }
                            restart_finished_relay(&state, &store, &mut relay).await;
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(err) => {
                            warn!(error = %err, "score store health check failed");
                            if reconnect(&state, store.as_ref()).await {
                                stop_relay(&mut relay);
                                relay = Some(spawn_relay(&state, store.clone()));
                                sleep(HEALTH_POLL_INTERVAL).await;
                                continue;
                            }
                            warn!("exhausted score store reconnect attempts; staying in degraded mode");
                            break;
                        }
                    }
                }

                stop_relay(&mut relay);
                state.stores().clear().await;
                sleep(jittered(delay)).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "score store connection attempt failed");
                sleep(jittered(delay)).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Try to revive an existing connection; degraded mode starts on the first failure.
async fn reconnect(state: &SharedState, store: &dyn ScoreStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "score store reconnected after health check failure");
                state.stores().update_degraded(false);
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(
                        attempt, error = %err,
                        "score store reconnect first attempt failed; entering degraded mode"
                    );
                    state.stores().update_degraded(true);
                } else {
                    warn!(attempt, error = %err, "score store reconnect attempt failed");
                }
                sleep(jittered(reconnect_delay)).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

fn spawn_relay(state: &SharedState, store: Arc<dyn ScoreStore>) -> JoinHandle<RelayExit> {
    tokio::spawn(feed_relay::run(
        store,
        state.cache().clone(),
        state.feed().clone(),
    ))
}

/// Reopen the relay when it ended, unless the store has no push channel at all.
async fn restart_finished_relay(
    state: &SharedState,
    store: &Arc<dyn ScoreStore>,
    relay: &mut Option<JoinHandle<RelayExit>>,
) {
    let Some(handle) = relay.take_if(|handle| handle.is_finished()) else {
        return;
    };
    match handle.await {
        Ok(RelayExit::Unsupported) => {}
        _ => *relay = Some(spawn_relay(state, store.clone())),
    }
}

fn stop_relay(relay: &mut Option<JoinHandle<RelayExit>>) {
    if let Some(handle) = relay.take() {
        handle.abort();
    }
}

/// Add up to 20% random jitter so nodes do not reconnect in lockstep.
fn jittered(delay: Duration) -> Duration {
    let max_jitter = delay.as_millis() as u64 / 5;
    if max_jitter == 0 {
        return delay;
    }
    let jitter = rand::rng().random_range(0..=max_jitter);
    delay + Duration::from_millis(jitter)
}
