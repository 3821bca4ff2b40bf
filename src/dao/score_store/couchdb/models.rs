use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::models::HistoryEntity;

pub const SCORE_DOC_ID: &str = "score::global";
pub const HISTORY_PREFIX: &str = "history::";
pub const COOLDOWN_PREFIX: &str = "cooldown::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Minimal projection used to learn the current revision of any document.
#[derive(Debug, Deserialize)]
pub struct RevisionOnly {
    #[serde(rename = "_rev")]
    pub rev: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchScoreDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub value: i64,
}

impl CouchScoreDocument {
    pub fn new(value: i64, rev: Option<String>) -> Self {
        Self {
            id: SCORE_DOC_ID.to_owned(),
            rev,
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchHistoryDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub entry: HistoryEntity,
}

impl From<HistoryEntity> for CouchHistoryDocument {
    fn from(entry: HistoryEntity) -> Self {
        Self {
            id: history_doc_id(&entry.id),
            entry,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchCooldownDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub last_mutation_ms: i64,
}

pub fn history_doc_id(entry_id: &str) -> String {
    format!("{HISTORY_PREFIX}{entry_id}")
}

pub fn cooldown_doc_id(actor: &str) -> String {
    format!("{COOLDOWN_PREFIX}{actor}")
}
