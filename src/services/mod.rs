/// Commentary collaborator and its static fallback.
pub mod commentary;
/// Per-actor cooldown decisions.
pub mod cooldown;
/// OpenAPI documentation generation.
pub mod documentation;
/// Store push channel relayed onto the change feed.
pub mod feed_relay;
/// Change feed subscriptions and SSE conversion.
pub mod feed_service;
/// Health check service.
pub mod health_service;
/// Daily rate snapshots and rollover announcements.
pub mod rate_service;
/// Read views and mutation entrypoints used by the HTTP routes.
pub mod score_service;
/// Store connection supervisor with reconnect backoff.
pub mod storage_supervisor;
/// Mutation orchestration across the persistence tiers.
pub mod sync_engine;
/// Ordered persistence tiers for a single mutation.
pub mod tiers;
