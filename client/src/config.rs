//! Configuration management for the client.

use std::{env, path::PathBuf, time::Duration};

/// Default remote service endpoint.
pub const DEFAULT_BASE_URL: &str = "https://baas.kinvey.com";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Application key, part of every data and blob URL
    pub app_key: String,
    /// Remote service base URL
    pub base_url: String,
    /// Snapshot file of the local store
    pub store_path: PathBuf,
    /// Directory for downloaded blobs
    pub files_dir: PathBuf,
    /// Default maximum age of cached records
    pub cache_ttl: Option<Duration>,
    /// Session token to start with
    pub auth_token: Option<String>,
    /// Replace an unreadable store file with an empty store
    pub reset_on_open_failure: bool,
}

impl Config {
    /// Configuration with defaults for everything but the app key.
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            store_path: PathBuf::from("harbor-store.json"),
            files_dir: PathBuf::from("harbor-files"),
            cache_ttl: None,
            auth_token: None,
            reset_on_open_failure: false,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_key = env::var("HARBOR_APP_KEY").map_err(|_| ConfigError::MissingAppKey)?;
        let mut config = Self::new(app_key);

        if let Ok(base_url) = env::var("HARBOR_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(path) = env::var("HARBOR_STORE_PATH") {
            config.store_path = PathBuf::from(path);
        }
        if let Ok(dir) = env::var("HARBOR_FILES_DIR") {
            config.files_dir = PathBuf::from(dir);
        }
        if let Ok(ttl) = env::var("HARBOR_CACHE_TTL_SECS") {
            let secs: u64 = ttl.parse().map_err(|_| ConfigError::InvalidTtl(ttl))?;
            config.cache_ttl = Some(Duration::from_secs(secs));
        }
        config.auth_token = env::var("HARBOR_AUTH_TOKEN").ok().filter(|t| !t.is_empty());
        if let Ok(flag) = env::var("HARBOR_RESET_ON_OPEN_FAILURE") {
            config.reset_on_open_failure = parse_flag(&flag)?;
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = dir.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_reset_on_open_failure(mut self, reset: bool) -> Self {
        self.reset_on_open_failure = reset;
        self
    }
}

fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidFlag(value.to_string())),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("HARBOR_APP_KEY environment variable is required")]
    MissingAppKey,

    #[error("invalid HARBOR_CACHE_TTL_SECS value: {0}")]
    InvalidTtl(String),

    #[error("invalid boolean flag: {0}")]
    InvalidFlag(String),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}
