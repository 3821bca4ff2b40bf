use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Date, OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use uuid::Uuid;

use crate::domain::{
    rate,
    score::{HistoryEntry, RateSnapshot},
};

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Raised when a persisted record cannot be turned back into a domain value.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("invalid history id `{value}`")]
    InvalidId {
        value: String,
        #[source]
        source: uuid::Error,
    },
    #[error("timestamp `{value}` is out of range")]
    InvalidTimestamp { value: i64 },
    #[error("invalid rate date `{value}`")]
    InvalidDate {
        value: String,
        #[source]
        source: time::error::Parse,
    },
}

/// Persisted form of a [`HistoryEntry`], with the timestamp in unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntity {
    /// Hyphenated time-ordered UUID; lexicographic order is generation order.
    pub id: String,
    pub delta: i64,
    pub resulting_score: i64,
    pub timestamp_ms: i64,
}

impl From<&HistoryEntry> for HistoryEntity {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            id: entry.id.hyphenated().to_string(),
            delta: entry.delta,
            resulting_score: entry.resulting_score,
            timestamp_ms: to_unix_ms(entry.timestamp),
        }
    }
}

impl TryFrom<HistoryEntity> for HistoryEntry {
    type Error = EntityError;

    fn try_from(entity: HistoryEntity) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&entity.id).map_err(|source| EntityError::InvalidId {
            value: entity.id.clone(),
            source,
        })?;
        Ok(Self {
            id,
            delta: entity.delta,
            resulting_score: entity.resulting_score,
            timestamp: from_unix_ms(entity.timestamp_ms)?,
        })
    }
}

/// Persisted form of a [`RateSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateEntity {
    pub value: f64,
    /// ISO calendar date the value was derived for.
    pub computed_for: String,
}

impl From<&RateSnapshot> for RateEntity {
    fn from(snapshot: &RateSnapshot) -> Self {
        Self {
            value: snapshot.value,
            computed_for: rate::iso_date(snapshot.computed_for),
        }
    }
}

impl TryFrom<RateEntity> for RateSnapshot {
    type Error = EntityError;

    fn try_from(entity: RateEntity) -> Result<Self, Self::Error> {
        let computed_for = Date::parse(&entity.computed_for, DATE_FORMAT).map_err(|source| {
            EntityError::InvalidDate {
                value: entity.computed_for.clone(),
                source,
            }
        })?;
        Ok(Self {
            value: entity.value,
            computed_for,
        })
    }
}

/// Milliseconds since the unix epoch.
pub fn to_unix_ms(instant: OffsetDateTime) -> i64 {
    (instant.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Inverse of [`to_unix_ms`].
pub fn from_unix_ms(value: i64) -> Result<OffsetDateTime, EntityError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(value) * 1_000_000)
        .map_err(|_| EntityError::InvalidTimestamp { value })
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use super::*;

    #[test]
    fn history_entity_keeps_millisecond_precision() {
        let entry = HistoryEntry::new(-3, 42, datetime!(2026-10-19 08:30:15.250 UTC));
        let entity = HistoryEntity::from(&entry);
        assert_eq!(entity.timestamp_ms % 1_000, 250);

        let back = HistoryEntry::try_from(entity).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn rate_entity_parses_iso_dates() {
        let snapshot = RateSnapshot {
            value: 1.25,
            computed_for: date!(2026 - 02 - 03),
        };
        let entity = RateEntity::from(&snapshot);
        assert_eq!(entity.computed_for, "2026-02-03");
        assert_eq!(RateSnapshot::try_from(entity).unwrap(), snapshot);
    }

    #[test]
    fn corrupt_rate_date_is_rejected() {
        let entity = RateEntity {
            value: 2.0,
            computed_for: "yesterday".into(),
        };
        assert!(matches!(
            RateSnapshot::try_from(entity),
            Err(EntityError::InvalidDate { .. })
        ));
    }
}
