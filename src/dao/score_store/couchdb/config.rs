use std::{env, time::Duration};

use super::error::{CouchDaoError, CouchResult};

const BASE_URL_VAR: &str = "COUCH_BASE_URL";
const DATABASE_VAR: &str = "COUCH_DB";
const USERNAME_VAR: &str = "COUCH_USERNAME";
const PASSWORD_VAR: &str = "COUCH_PASSWORD";
const DEFAULT_DATABASE: &str = "score_sync";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Basic-auth pair sent with every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouchCredentials {
    pub username: String,
    pub password: String,
}

/// Where the score documents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouchConfig {
    /// Server root without trailing slash.
    pub base_url: String,
    pub database: String,
    pub credentials: Option<CouchCredentials>,
    /// Upper bound for a single HTTP round trip, so an unresponsive server
    /// reads as unreachable instead of stalling a mutation.
    pub request_timeout: Duration,
}

impl CouchConfig {
    pub fn new(base_url: &str, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            database: database.into(),
            credentials: None,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Read `COUCH_BASE_URL` (required), `COUCH_DB` and the optional credential pair.
    pub fn from_env() -> CouchResult<Self> {
        let base_url = env::var(BASE_URL_VAR)
            .map_err(|_| CouchDaoError::MissingEnvVar { var: BASE_URL_VAR })?;
        let database = env::var(DATABASE_VAR).unwrap_or_else(|_| DEFAULT_DATABASE.into());

        let mut config = Self::new(&base_url, database);
        config.credentials = env::var(USERNAME_VAR)
            .ok()
            .zip(env::var(PASSWORD_VAR).ok())
            .map(|(username, password)| CouchCredentials { username, password });
        Ok(config)
    }

    pub fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    pub fn document_url(&self, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.database, doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_ignore_trailing_slashes() {
        let config = CouchConfig::new("http://couch:5984//", "scores");

        assert_eq!(config.database_url(), "http://couch:5984/scores");
        assert_eq!(
            config.document_url("score"),
            "http://couch:5984/scores/score"
        );
        assert_eq!(config.credentials, None);
    }
}
