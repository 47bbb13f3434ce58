//! HTTP implementation of [`DataSource`] against the air-quality backend.
//!
//! Two read-only endpoints are used:
//!
//! - `GET /devices` → `{ "devices": [string] }`
//! - `GET /devices/{id}/data` → `{ "data": [{ "Timestamp", "PM10", "PM25" }] }`
//!
//! The per-device endpoint takes its window as the request headers
//! `start_date` and `end_date`, not as query parameters. That is what the
//! deployed backend reads, so it is kept as is.
//!
//! # Example
//!
//! ```rust,no_run
//! use airwatch::config::ClientConfig;
//! use airwatch::http::HttpSource;
//! use airwatch::reading::TimeWindow;
//! use airwatch::source::DataSource;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = HttpSource::new(&ClientConfig::new("http://air.local:5000"))?;
//! for device in source.list_devices().await? {
//!     let series = source.fetch_series(&device, &TimeWindow::last_week()).await?;
//!     println!("{device}: {} readings", series.len());
//! }
//! # Ok(())
//! # }
//! ```

use reqwest::{RequestBuilder, Response, StatusCode, Url};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ConfigError, TransportError};
use crate::reading::{self, DeviceId, RawReading, TimeWindow};
use crate::source::DataSource;

/// Header carrying the window start on the per-device endpoint.
pub const START_DATE_HEADER: &str = "start_date";

/// Header carrying the window end on the per-device endpoint.
pub const END_DATE_HEADER: &str = "end_date";

/// Backend client built on a single shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base: Url,
}

impl HttpSource {
    /// Creates a source for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config is invalid, or
    /// [`TransportError::ClientCreate`] if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> crate::Result<Self> {
        config.validate()?;
        let base = Url::parse(&config.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::ClientCreate { source: e })?;

        Ok(Self { client, base })
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Joins path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(request: RequestBuilder, url: &Url) -> Result<Response, TransportError> {
        request.send().await.map_err(|e| TransportError::RequestFailed {
            url: url.to_string(),
            source: e,
        })
    }

    /// Reads a successful body, or turns a non-2xx status into an error.
    async fn body(response: Response, url: &Url) -> Result<Vec<u8>, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TransportError::RequestFailed {
                url: url.to_string(),
                source: e,
            })
    }
}

impl DataSource for HttpSource {
    async fn list_devices(&self) -> Result<Vec<DeviceId>, TransportError> {
        let url = self.endpoint(&["devices"]);
        let response = Self::send(self.client.get(url.clone()), &url).await?;
        let body = Self::body(response, &url).await?;

        let devices = reading::decode_devices(&body).map_err(|e| TransportError::Decode {
            url: url.to_string(),
            source: e,
        })?;
        debug!("registry returned {} device(s)", devices.len());
        Ok(devices)
    }

    async fn fetch_series(
        &self,
        device: &DeviceId,
        window: &TimeWindow,
    ) -> Result<Vec<RawReading>, TransportError> {
        let url = self.endpoint(&["devices", device.as_str(), "data"]);
        let request = self
            .client
            .get(url.clone())
            .header(START_DATE_HEADER, window.start_param())
            .header(END_DATE_HEADER, window.end_param());
        let response = Self::send(request, &url).await?;

        // The backend answers 404 with a "No data found" message when a
        // device has no stored items. Any other 404 is a real error.
        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            if reading::is_no_data(body.as_bytes()) {
                debug!("no data for device {device} in {window}");
                return Ok(Vec::new());
            }
            return Err(TransportError::HttpStatus {
                url: url.to_string(),
                status: StatusCode::NOT_FOUND.as_u16(),
                body,
            });
        }

        let body = Self::body(response, &url).await?;
        let readings = reading::decode_series(device, &body).map_err(|e| TransportError::Decode {
            url: url.to_string(),
            source: e,
        })?;
        debug!("device {device} returned {} reading(s) for {window}", readings.len());
        Ok(readings)
    }
}
