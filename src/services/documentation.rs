use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the score sync service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::score_stream,
        crate::routes::score::get_score,
        crate::routes::score::get_history,
        crate::routes::score::get_rate,
        crate::routes::score::get_commentary,
        crate::routes::score::increase,
        crate::routes::score::decrease,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::score::ScoreView,
            crate::dto::score::HistoryView,
            crate::dto::score::HistoryEntryView,
            crate::dto::score::RateView,
            crate::dto::score::MutationResponse,
            crate::dto::score::CommentaryView,
            crate::dto::sse::ScoreChangedEvent,
            crate::dto::sse::HistoryEntryEvent,
            crate::dto::sse::RateChangedEvent,
            crate::services::tiers::AppliedVia,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "score", description = "Shared score views and mutations"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
