//! CouchDB backend. CouchDB has no atomic increment, so every mutation through
//! this store takes the read-modify-write path.

mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use error::CouchDaoError;
pub use store::CouchScoreStore;

use crate::dao::storage::StorageError;

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::Conflict { path } => {
                StorageError::conflict(format!("document `{path}` changed concurrently"))
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
