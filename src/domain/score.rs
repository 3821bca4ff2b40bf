//! Records describing the shared score, its mutation history and actor cooldowns.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Fixed identifier of the singleton score row.
pub const SCORE_KEY: &str = "global";

/// Which way an actor pushes the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Raise the score by the current up magnitude.
    Increase,
    /// Lower the score by the current down magnitude.
    Decrease,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Increase => f.write_str("increase"),
            Direction::Decrease => f.write_str("decrease"),
        }
    }
}

/// Immutable record appended once per applied mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Time-ordered identifier; breaks timestamp ties in generation order.
    pub id: Uuid,
    /// Signed magnitude that was applied.
    pub delta: i64,
    /// Score value right after the mutation.
    pub resulting_score: i64,
    /// When the mutation was accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl HistoryEntry {
    /// Build a fresh entry stamped with a new time-ordered id.
    pub fn new(delta: i64, resulting_score: i64, timestamp: OffsetDateTime) -> Self {
        Self {
            id: Uuid::now_v7(),
            delta,
            resulting_score,
            timestamp,
        }
    }
}

/// Last accepted mutation of a single actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownRecord {
    pub actor: String,
    pub last_mutation_at: OffsetDateTime,
}

/// Rate value valid for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub value: f64,
    pub computed_for: Date,
}

/// Sort entries chronologically, ties broken by their time-ordered ids.
pub fn sort_chronologically(entries: &mut [HistoryEntry]) {
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
}

/// Keep only the `limit` most recent entries of an already sorted list.
pub fn keep_recent(mut entries: Vec<HistoryEntry>, limit: usize) -> Vec<HistoryEntry> {
    if entries.len() > limit {
        entries.drain(..entries.len() - limit);
    }
    entries
}
