//! Error types for the airwatch data layer.

use thiserror::Error;

use crate::reading::DeviceId;

/// The main error type for all airwatch operations.
///
/// Empty device lists, empty series and empty windows are never errors; they
/// come back as `Ok` with an empty collection.
#[derive(Error, Debug)]
pub enum AirwatchError {
    /// A single request to the backend failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// One or more per-device fetches inside a fan-out failed.
    #[error("aggregate fetch error: {0}")]
    AggregateFetch(#[from] AggregateFetchError),

    /// Error loading or validating client configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error building or running a cached query.
    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

impl AirwatchError {
    /// Returns the failing device identifiers if this is an aggregate failure.
    pub fn failed_devices(&self) -> Option<Vec<&DeviceId>> {
        match self {
            Self::AggregateFetch(e) => Some(e.devices().collect()),
            _ => None,
        }
    }
}

/// Errors from a single request/response exchange with the backend.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to create HTTP client.
    #[error("failed to create HTTP client: {source}")]
    ClientCreate {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The request could not be sent or the response body could not be read.
    #[error("request to {url} failed: {source}")]
    RequestFailed {
        /// The requested URL.
        url: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Server returned a non-2xx status.
    #[error("{url} returned status {status}: {body}")]
    HttpStatus {
        /// The requested URL.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The response body text.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected response shape from {url}: {source}")]
    Decode {
        /// The requested URL.
        url: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// A single device's failure inside a fan-out.
#[derive(Debug)]
pub struct DeviceFailure {
    /// The device whose fetch failed.
    pub device: DeviceId,
    /// Why it failed.
    pub error: TransportError,
}

/// All-or-nothing failure of a fan-out: every failing device is reported.
#[derive(Error, Debug)]
#[error("{} of the requested devices failed: {}", failures.len(), describe(failures))]
pub struct AggregateFetchError {
    /// Failures in the order the devices were requested.
    pub failures: Vec<DeviceFailure>,
}

impl AggregateFetchError {
    /// Iterates the identifiers of the devices that failed.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.failures.iter().map(|f| &f.device)
    }
}

fn describe(failures: &[DeviceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.device, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur when loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// The config file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON of the expected shape.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// The config file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The base URL is not an absolute http(s) URL.
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A duration setting is zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration {
        /// The offending setting name.
        field: &'static str,
    },
}

/// Errors that can occur when building or running a query.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The time range is invalid (start > end).
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidTimeRange {
        /// The start time.
        start: String,
        /// The end time.
        end: String,
    },

    /// The query's preconditions do not hold, so it was not issued.
    #[error("query {key} is not ready to run")]
    NotReady {
        /// Display form of the query key.
        key: String,
    },

    /// The background fetch task ended without producing a result.
    #[error("fetch task for {key} failed: {reason}")]
    TaskFailed {
        /// Display form of the query key.
        key: String,
        /// Description of the failure.
        reason: String,
    },
}

/// Type alias for `Result<T, AirwatchError>`.
pub type Result<T> = std::result::Result<T, AirwatchError>;
