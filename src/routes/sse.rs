use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{
    services::feed_service,
    state::{FeedEvent, SharedState},
};

#[utoipa::path(
    get,
    path = "/sse/score",
    tag = "sse",
    responses((status = 200, description = "Score change feed", content_type = "text/event-stream", body = String))
)]
/// Stream score, history and rate changes, starting with the current score.
pub async fn score_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = state.feed().subscribe();
    let current = state.engine().read_score().await;
    info!(score = current.value, "New score SSE connection");
    feed_service::to_sse_stream(receiver, vec![FeedEvent::Score(current.value)])
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/score", get(score_stream))
}
