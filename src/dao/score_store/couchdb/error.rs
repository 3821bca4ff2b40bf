//! Failures of the CouchDB score store, before they are folded into `StorageError`.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::models::EntityError;

/// Result of a raw CouchDB call.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failure of a single CouchDB round trip.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    /// `COUCH_BASE_URL` or another required variable is unset.
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// The HTTP client could not be built.
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// Probing the database failed.
    #[error("score database `{database}` could not be reached")]
    DatabaseQuery {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// Creating the missing database failed.
    #[error("score database `{database}` could not be created")]
    DatabaseCreate {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("score database `{database}` answered {status}")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    #[error("request for score document `{path}` was not sent")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("score document `{path}` answered {status}")]
    RequestStatus { path: String, status: StatusCode },
    /// The document revision moved on between our read and our write.
    #[error("CouchDB revision conflict on `{path}`")]
    Conflict { path: String },
    #[error("score document `{path}` is not valid JSON")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("score document `{path}` has an unexpected shape")]
    DeserializeValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// A stored document decoded but holds invalid values.
    #[error("CouchDB document `{path}` is corrupt")]
    CorruptDocument {
        path: String,
        #[source]
        source: EntityError,
    },
}
