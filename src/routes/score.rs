use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, Query, State},
    http::request::Parts,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    domain::score::Direction,
    dto::score::{
        CommentaryView, HistoryQuery, HistoryView, MutationResponse, RateView, ScoreView,
    },
    error::AppError,
    services::score_service,
    state::SharedState,
};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Identity a mutation is throttled under: the caller's network address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorId(pub String);

impl FromRequestParts<SharedState> for ActorId {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        if state.config().trust_forwarded_for {
            let forwarded = parts
                .headers
                .get(FORWARDED_FOR)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(actor) = forwarded {
                return Ok(Self(actor.to_owned()));
            }
        }

        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| Self(addr.ip().to_string()))
            .ok_or_else(|| AppError::BadRequest("caller address is unknown".into()))
    }
}

/// Score views and the two mutation actions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/score", get(get_score))
        .route("/score/history", get(get_history))
        .route("/score/rate", get(get_rate))
        .route("/score/commentary", get(get_commentary))
        .route("/score/increase", post(increase))
        .route("/score/decrease", post(decrease))
}

/// Current score, recent history, today's rate and the caller's cooldown.
#[utoipa::path(
    get,
    path = "/score",
    tag = "score",
    responses((status = 200, description = "Score view", body = ScoreView))
)]
pub async fn get_score(State(state): State<SharedState>, actor: ActorId) -> Json<ScoreView> {
    Json(score_service::score_view(&state, &actor.0).await)
}

/// Most recent history entries, oldest first.
#[utoipa::path(
    get,
    path = "/score/history",
    tag = "score",
    params(HistoryQuery),
    responses(
        (status = 200, description = "History window", body = HistoryView),
        (status = 400, description = "Limit out of range")
    )
)]
pub async fn get_history(
    State(state): State<SharedState>,
    Valid(Query(query)): Valid<Query<HistoryQuery>>,
) -> Result<Json<HistoryView>, AppError> {
    Ok(Json(score_service::history_view(&state, query.limit).await?))
}

/// Today's rate and the resulting point split.
#[utoipa::path(
    get,
    path = "/score/rate",
    tag = "score",
    responses((status = 200, description = "Rate of the day", body = RateView))
)]
pub async fn get_rate(State(state): State<SharedState>) -> Json<RateView> {
    Json(score_service::rate_view(&state))
}

/// A line of commentary about the latest change; never fails.
#[utoipa::path(
    get,
    path = "/score/commentary",
    tag = "score",
    responses((status = 200, description = "Commentary", body = CommentaryView))
)]
pub async fn get_commentary(State(state): State<SharedState>) -> Json<CommentaryView> {
    Json(score_service::commentary(&state).await)
}

#[utoipa::path(
    post,
    path = "/score/increase",
    tag = "score",
    responses(
        (status = 200, description = "Mutation applied", body = MutationResponse),
        (status = 409, description = "A mutation by this caller is in flight, or the write conflicted"),
        (status = 429, description = "Cooldown active"),
        (status = 503, description = "Score could not be persisted")
    )
)]
/// Raise the score by today's up magnitude.
pub async fn increase(
    State(state): State<SharedState>,
    actor: ActorId,
) -> Result<Json<MutationResponse>, AppError> {
    let response = score_service::mutate(&state, &actor.0, Direction::Increase).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/score/decrease",
    tag = "score",
    responses(
        (status = 200, description = "Mutation applied", body = MutationResponse),
        (status = 409, description = "A mutation by this caller is in flight, or the write conflicted"),
        (status = 429, description = "Cooldown active"),
        (status = 503, description = "Score could not be persisted")
    )
)]
/// Lower the score by today's down magnitude.
pub async fn decrease(
    State(state): State<SharedState>,
    actor: ActorId,
) -> Result<Json<MutationResponse>, AppError> {
    let response = score_service::mutate(&state, &actor.0, Direction::Decrease).await?;
    Ok(Json(response))
}
