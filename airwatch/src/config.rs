//! Client configuration.
//!
//! Configuration is limited to where the backend lives and how the cache
//! behaves over time. It can be built in code or loaded from a JSON file
//! using the dashboard's camelCase shape:
//!
//! ```json
//! { "baseUrl": "http://air.local:5000", "refreshIntervalMs": 240000,
//!   "requestTimeoutMs": 30000, "cacheTimeMs": 300000 }
//! ```
//!
//! Every field in the file is optional; missing ones take the defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Backend address the dashboard was deployed against.
pub const DEFAULT_BASE_URL: &str = "http://air.local:5000";

/// How often an observed query is re-fetched.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Per-request timeout enforced by the HTTP client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long an unobserved cache entry is kept before eviction.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

/// Configuration shared by the HTTP source and the query cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the backend, without a trailing slash.
    pub base_url: String,
    /// Interval between background refreshes of an observed query.
    pub refresh_interval: Duration,
    /// HTTP timeout for each request.
    pub request_timeout: Duration,
    /// How long an unobserved cache entry survives.
    pub cache_time: Duration,
}

/// On-disk shape of [`ClientConfig`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigFile {
    base_url: Option<String>,
    refresh_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    cache_time_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ClientConfig {
    /// Creates a config for `base_url` with default timings.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cache_time: DEFAULT_CACHE_TIME,
        }
    }

    /// Loads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, does not parse, or
    /// fails validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&data).map_err(|e| match e {
            crate::AirwatchError::Config(ConfigError::Parse { source, .. }) => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            }
            .into(),
            other => other,
        })
    }

    /// Parses and validates config from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the JSON does not parse or fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            source: e,
        })?;

        let mut config = file
            .base_url
            .map_or_else(Self::default, Self::new);
        if let Some(ms) = file.refresh_interval_ms {
            config.refresh_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.cache_time_ms {
            config.cache_time = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Sets the background refresh interval.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the HTTP timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets how long unobserved cache entries survive.
    #[must_use]
    pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = cache_time;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the base URL is not an absolute http(s) URL
    /// or a duration is zero.
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }
            .into());
        }

        for (field, value) in [
            ("refreshIntervalMs", self.refresh_interval),
            ("requestTimeoutMs", self.request_timeout),
            ("cacheTimeMs", self.cache_time),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field }.into());
            }
        }

        Ok(())
    }
}
