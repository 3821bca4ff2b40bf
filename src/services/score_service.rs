use tracing::info;

use crate::{
    clock::Clock,
    domain::score::Direction,
    dto::score::{
        CommentaryView, HistoryEntryView, HistoryView, MutationResponse, RateView, ScoreView,
    },
    error::ServiceError,
    services::commentary::comment_or_fallback,
    state::SharedState,
};

/// Apply a mutation for `actor` through the sync engine.
pub async fn mutate(
    state: &SharedState,
    actor: &str,
    direction: Direction,
) -> Result<MutationResponse, ServiceError> {
    let outcome = state.engine().apply_mutation(actor, direction).await?;
    Ok(outcome.into())
}

/// Combined view of score, recent history, rate and the caller's cooldown.
pub async fn score_view(state: &SharedState, actor: &str) -> ScoreView {
    let engine = state.engine();
    let score = engine.read_score().await;
    let history = engine.read_history(state.config().history_limit).await;
    let cooldown = engine.cooldown_remaining(actor).await;

    ScoreView {
        score: score.value,
        history: history.value.iter().map(HistoryEntryView::from).collect(),
        rate: rate_view(state),
        cooldown_remaining_ms: u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
        synchronized: score.synchronized && history.synchronized,
    }
}

/// Up to `limit` most recent history entries, defaulting to the configured window.
pub async fn history_view(
    state: &SharedState,
    limit: Option<usize>,
) -> Result<HistoryView, ServiceError> {
    let max = state.config().history_limit;
    let limit = limit.unwrap_or(max);
    if limit == 0 || limit > max {
        return Err(ServiceError::InvalidInput(format!(
            "limit must be between 1 and {max}"
        )));
    }

    let history = state.engine().read_history(limit).await;
    Ok(HistoryView {
        entries: history.value.iter().map(HistoryEntryView::from).collect(),
        synchronized: history.synchronized,
    })
}

/// Today's rate for this node's local date.
pub fn rate_view(state: &SharedState) -> RateView {
    state.rates().snapshot_at(state.clock().now()).into()
}

/// Commentary on the latest change, never failing.
pub async fn commentary(state: &SharedState) -> CommentaryView {
    let engine = state.engine();
    let score = engine.read_score().await.value;
    let delta = engine
        .read_history(1)
        .await
        .value
        .last()
        .map_or(0, |entry| entry.delta);

    let text = comment_or_fallback(
        state.commentator().as_ref(),
        score,
        delta,
        state.config().commentary_timeout,
    )
    .await;
    info!(score, delta, "served commentary");

    CommentaryView { text, score, delta }
}
