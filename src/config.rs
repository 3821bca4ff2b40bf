//! Application-level configuration loading.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use time::UtcOffset;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SCORE_SYNC_CONFIG_PATH";
/// Environment variable that overrides the configured store backend.
const STORE_ENV: &str = "SCORE_STORE";

/// Which shared store the node talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local store; every node has its own score.
    Memory,
    Mongo,
    Couch,
}

impl StoreBackend {
    /// Name used in configuration and health reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Mongo => "mongo",
            Self::Couch => "couch",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "mongo" | "mongodb" => Some(Self::Mongo),
            "couch" | "couchdb" => Some(Self::Couch),
            _ => None,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Minimum time between two accepted mutations of one actor.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "cooldown_window_secs")]
    pub cooldown_window: Duration,
    /// Size of the recent history window kept and served.
    pub history_limit: usize,
    /// Buffered events per change feed subscriber before it starts lagging.
    pub feed_capacity: usize,
    /// Offset defining local midnight for the daily rate rollover.
    pub rate_utc_offset_minutes: i16,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "rate_poll_secs")]
    pub rate_poll_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "commentary_timeout_ms")]
    pub commentary_timeout: Duration,
    /// Identify actors by `X-Forwarded-For` instead of the peer address.
    pub trust_forwarded_for: bool,
    /// Local cache file; `None` keeps the cache in memory only.
    pub cache_path: Option<PathBuf>,
    pub store: StoreBackend,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        if let Ok(value) = env::var(STORE_ENV) {
            match StoreBackend::parse(&value) {
                Some(store) => config.store = store,
                None => warn!(value, "unknown {STORE_ENV} value; keeping configured store"),
            }
        }

        config.sanitized()
    }

    /// Offset used to compute each day's local date.
    pub fn rate_offset(&self) -> UtcOffset {
        let seconds = i32::from(self.rate_utc_offset_minutes) * 60;
        UtcOffset::from_whole_seconds(seconds).unwrap_or(UtcOffset::UTC)
    }

    fn sanitized(mut self) -> Self {
        self.history_limit = self.history_limit.clamp(1, MAX_HISTORY_LIMIT);
        self.feed_capacity = self.feed_capacity.max(1);
        if self.rate_poll_interval.is_zero() {
            self.rate_poll_interval = Self::default().rate_poll_interval;
        }
        self
    }
}

/// Hard ceiling on the history window, whatever the configuration says.
pub const MAX_HISTORY_LIMIT: usize = 500;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cooldown_window: Duration::from_secs(5 * 60),
            history_limit: 50,
            feed_capacity: 64,
            rate_utc_offset_minutes: 0,
            rate_poll_interval: Duration::from_secs(30),
            commentary_timeout: Duration::from_millis(1_500),
            trust_forwarded_for: false,
            cache_path: Some(PathBuf::from("data/local_cache.json")),
            store: StoreBackend::Memory,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"cooldown_window_secs": 60, "store": "couch"}"#).unwrap();

        assert_eq!(config.cooldown_window, Duration::from_secs(60));
        assert_eq!(config.store, StoreBackend::Couch);
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.commentary_timeout, Duration::from_millis(1_500));
    }

    #[test]
    fn sanitizing_clamps_out_of_range_values() {
        let config: AppConfig =
            serde_json::from_str(r#"{"history_limit": 0, "rate_poll_secs": 0}"#).unwrap();
        let config = config.sanitized();

        assert_eq!(config.history_limit, 1);
        assert_eq!(config.rate_poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn rate_offset_follows_minutes() {
        let config = AppConfig {
            rate_utc_offset_minutes: -90,
            ..AppConfig::default()
        };
        assert_eq!(config.rate_offset().whole_minutes(), -90);
    }

    #[test]
    fn backend_names_are_case_insensitive() {
        assert_eq!(StoreBackend::parse("MongoDB"), Some(StoreBackend::Mongo));
        assert_eq!(StoreBackend::parse(" couch "), Some(StoreBackend::Couch));
        assert_eq!(StoreBackend::parse("redis"), None);
    }
}
