use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::score::{HistoryEntryView, RateView};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast whenever the shared score changes, whoever changed it.
pub struct ScoreChangedEvent {
    pub score: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
/// Broadcast for every history entry appended.
pub struct HistoryEntryEvent(pub HistoryEntryView);

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
/// Broadcast when the local date rolls over and a new rate applies.
pub struct RateChangedEvent(pub RateView);
