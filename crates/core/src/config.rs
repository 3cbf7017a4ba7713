//! Client configuration.
//!
//! Loaded from environment variables (a `.env` file is honoured for local development); every
//! field except the API key has a default so tests and offline tooling can build a config
//! with `ClientConfig::default()`.

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::{error::ConfigError, types::FetchPreferences};

pub const DEFAULT_API_URL: &str = "https://api.newscast.app";
pub const API_KEY_ENV: &str = "NEWSCAST_API_KEY";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub api_key: Option<String>,
    /// Interval between job status polls of the HTTP briefing service.
    pub fetch_poll_interval: Duration,
    /// Period of the schedule runner's tick.
    pub schedule_tick: Duration,
    /// How long after a schedule's time of day it is still considered due.
    pub schedule_window: Duration,
    /// Delay before re-arming position reports after an audio interruption.
    pub interruption_settle: Duration,
    pub data_dir: PathBuf,
    pub preferences: FetchPreferences,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            fetch_poll_interval: Duration::from_millis(1500),
            schedule_tick: Duration::from_secs(120),
            schedule_window: Duration::from_secs(180),
            interruption_settle: Duration::from_millis(100),
            data_dir: default_data_dir(),
            preferences: FetchPreferences::default(),
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("newscast")
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(url) = env::var("NEWSCAST_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        config.api_key = env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty());

        if let Some(ms) = parse_var::<u64>("NEWSCAST_POLL_MS")? {
            config.fetch_poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>("NEWSCAST_SCHEDULE_TICK_SECS")? {
            config.schedule_tick = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_var::<u64>("NEWSCAST_SCHEDULE_WINDOW_SECS")? {
            config.schedule_window = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>("NEWSCAST_INTERRUPT_SETTLE_MS")? {
            config.interruption_settle = Duration::from_millis(ms);
        }
        if let Ok(dir) = env::var("NEWSCAST_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(lang) = env::var("NEWSCAST_LANGUAGE") {
            config.preferences.language = lang;
        }

        Ok(config)
    }

    /// The API key, required by the HTTP briefing service.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar(API_KEY_ENV.to_string()))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }
}

fn parse_var<T: FromStr>(var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
