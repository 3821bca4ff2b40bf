use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether the node currently reaches its score store, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.stores().current().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "score store health check failed");
            }
        }
        None => warn!("score store unavailable (degraded mode)"),
    }

    let backend = state.config().store.as_str();
    let subscribers = state.feed().subscriber_count();
    if state.is_degraded() {
        HealthResponse::degraded(backend, subscribers)
    } else {
        HealthResponse::ok(backend, subscribers)
    }
}
