use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::{
    dao::models::{EntityError, HistoryEntity, from_unix_ms, to_unix_ms},
    domain::score::{CooldownRecord, HistoryEntry},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoScoreDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoHistoryDocument {
    #[serde(rename = "_id")]
    id: String,
    delta: i64,
    resulting_score: i64,
    timestamp: DateTime,
}

impl From<&HistoryEntry> for MongoHistoryDocument {
    fn from(entry: &HistoryEntry) -> Self {
        let entity = HistoryEntity::from(entry);
        Self {
            id: entity.id,
            delta: entity.delta,
            resulting_score: entity.resulting_score,
            timestamp: DateTime::from_millis(entity.timestamp_ms),
        }
    }
}

impl TryFrom<MongoHistoryDocument> for HistoryEntry {
    type Error = EntityError;

    fn try_from(doc: MongoHistoryDocument) -> Result<Self, Self::Error> {
        HistoryEntity {
            id: doc.id,
            delta: doc.delta,
            resulting_score: doc.resulting_score,
            timestamp_ms: doc.timestamp.timestamp_millis(),
        }
        .try_into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoCooldownDocument {
    #[serde(rename = "_id")]
    actor: String,
    last_mutation_at: DateTime,
}

impl From<CooldownRecord> for MongoCooldownDocument {
    fn from(record: CooldownRecord) -> Self {
        Self {
            actor: record.actor,
            last_mutation_at: DateTime::from_millis(to_unix_ms(record.last_mutation_at)),
        }
    }
}

impl MongoCooldownDocument {
    pub fn last_mutation_at(&self) -> Result<time::OffsetDateTime, EntityError> {
        from_unix_ms(self.last_mutation_at.timestamp_millis())
    }
}

pub fn doc_id(id: &str) -> Document {
    doc! {"_id": id}
}
