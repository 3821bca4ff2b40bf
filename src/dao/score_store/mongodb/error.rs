use mongodb::error::Error as MongoError;
use thiserror::Error;

use crate::dao::models::EntityError;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to read the score")]
    LoadScore {
        #[source]
        source: MongoError,
    },
    #[error("failed to increment the score by {delta}")]
    IncrementScore {
        delta: i64,
        #[source]
        source: MongoError,
    },
    #[error("failed to overwrite the score with {value}")]
    UpdateScore {
        value: i64,
        #[source]
        source: MongoError,
    },
    #[error("score document vanished after upsert")]
    MissingScore,
    #[error("failed to append history entry `{id}`")]
    AppendHistory {
        id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list history")]
    ListHistory {
        #[source]
        source: MongoError,
    },
    #[error("failed to load cooldown of `{actor}`")]
    LoadCooldown {
        actor: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to save cooldown of `{actor}`")]
    SaveCooldown {
        actor: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to open change stream on `{collection}`")]
    Watch {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("stored document in `{collection}` is corrupt")]
    CorruptDocument {
        collection: &'static str,
        #[source]
        source: EntityError,
    },
}
