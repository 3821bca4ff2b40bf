use std::{env, time::Duration};

use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const URI_VAR: &str = "MONGO_URI";
const DATABASE_VAR: &str = "MONGO_DB";
const DEFAULT_DATABASE: &str = "score_sync";
const APP_NAME: &str = "score-sync";
/// Fail store calls fast enough for the sync engine to fall back to the cache.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
}

impl MongoConfig {
    /// Parse `uri`, keeping any timeout it sets explicitly.
    pub async fn from_uri(uri: &str, database: Option<String>) -> MongoResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_owned());
        options
            .server_selection_timeout
            .get_or_insert(SERVER_SELECTION_TIMEOUT);

        Ok(Self {
            options,
            database_name: database.unwrap_or_else(|| DEFAULT_DATABASE.to_owned()),
        })
    }

    /// `MONGO_URI` is required, `MONGO_DB` falls back to `score_sync`.
    pub async fn from_env() -> MongoResult<Self> {
        let uri = env::var(URI_VAR).map_err(|_| MongoDaoError::MissingEnvVar { var: URI_VAR })?;
        Self::from_uri(&uri, env::var(DATABASE_VAR).ok()).await
    }
}
