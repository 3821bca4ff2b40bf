use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Configured score store backend.
    pub store: String,
    /// Observers currently attached to the change feed.
    pub feed_subscribers: usize,
}

impl HealthResponse {
    /// Health response for a node whose shared store is reachable.
    pub fn ok(store: impl Into<String>, feed_subscribers: usize) -> Self {
        Self {
            status: "ok".to_string(),
            store: store.into(),
            feed_subscribers,
        }
    }

    /// Health response for a node running on its local cache only.
    pub fn degraded(store: impl Into<String>, feed_subscribers: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            store: store.into(),
            feed_subscribers,
        }
    }
}
