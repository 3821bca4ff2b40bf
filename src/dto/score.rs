use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{
        rate::{iso_date, point_split},
        score::{HistoryEntry, RateSnapshot},
    },
    dto::format_timestamp,
    services::{sync_engine::MutationOutcome, tiers::AppliedVia},
};

#[derive(Debug, Clone, Serialize, ToSchema)]
/// One applied mutation as exposed to observers.
pub struct HistoryEntryView {
    pub id: Uuid,
    pub delta: i64,
    pub resulting_score: i64,
    /// RFC 3339 timestamp of the mutation.
    pub timestamp: String,
}

impl From<&HistoryEntry> for HistoryEntryView {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            id: entry.id,
            delta: entry.delta,
            resulting_score: entry.resulting_score,
            timestamp: format_timestamp(entry.timestamp),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Today's rate and the point split it produces.
pub struct RateView {
    pub value: f64,
    /// Local calendar date the rate belongs to (`YYYY-MM-DD`).
    pub computed_for: String,
    /// Points added by an increase.
    pub up_points: i64,
    /// Points removed by a decrease.
    pub down_points: i64,
}

impl From<RateSnapshot> for RateView {
    fn from(snapshot: RateSnapshot) -> Self {
        let split = point_split(snapshot.value);
        Self {
            value: snapshot.value,
            computed_for: iso_date(snapshot.computed_for),
            up_points: split.up,
            down_points: split.down,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Everything a presentation layer needs to render the score.
pub struct ScoreView {
    pub score: i64,
    /// Most recent entries, oldest first.
    pub history: Vec<HistoryEntryView>,
    pub rate: RateView,
    /// Wait left before the caller may mutate again.
    pub cooldown_remaining_ms: u64,
    /// `false` when the values come from this node's cache only.
    pub synchronized: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Bounded window of recent history.
pub struct HistoryView {
    pub entries: Vec<HistoryEntryView>,
    pub synchronized: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Result of an accepted increase or decrease.
pub struct MutationResponse {
    pub score: i64,
    pub entry: HistoryEntryView,
    pub applied_via: AppliedVia,
    pub synchronized: bool,
    /// `false` when the history append failed; the score change still stands.
    pub history_recorded: bool,
    pub rate: RateView,
}

impl From<MutationOutcome> for MutationResponse {
    fn from(outcome: MutationOutcome) -> Self {
        Self {
            score: outcome.new_score,
            entry: HistoryEntryView::from(&outcome.entry),
            applied_via: outcome.applied_via,
            synchronized: outcome.synchronized,
            history_recorded: outcome.history_recorded,
            rate: outcome.rate.into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Short commentary about the latest change.
pub struct CommentaryView {
    pub text: String,
    pub score: i64,
    pub delta: i64,
}

#[derive(Debug, Deserialize, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
/// Query parameters of the history endpoint.
pub struct HistoryQuery {
    /// Number of entries to return; defaults to the configured window.
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<usize>,
}
