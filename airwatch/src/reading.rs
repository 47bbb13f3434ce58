//! Core data model: device identifiers, raw readings and time windows.
//!
//! This module also owns the mapping from the backend's wire shapes to the
//! internal types. The per-device endpoint capitalises its field names
//! (`Timestamp`, `PM10`, `PM25`), so the wire structs live here and nothing
//! outside this module sees them.

use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{QueryError, Result};

/// Opaque identifier of a sensor device, as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One reading from one device, exactly as the backend reported it.
///
/// Numeric fields are kept as text. Parsing happens in the normalizer and the
/// statistics, where a bad value only drops its own record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReading {
    /// The device that produced the reading.
    pub device_id: DeviceId,
    /// ISO-8601 timestamp string.
    pub timestamp: String,
    /// PM10 concentration as a numeric string.
    pub pm10: String,
    /// PM2.5 concentration as a numeric string.
    pub pm25: String,
}

impl RawReading {
    /// Creates a reading from its parts.
    pub fn new(
        device_id: impl Into<DeviceId>,
        timestamp: impl Into<String>,
        pm10: impl Into<String>,
        pm25: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: timestamp.into(),
            pm10: pm10.into(),
            pm25: pm25.into(),
        }
    }
}

/// A closed time range `[start, end]` with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Default look-back used by the dashboard when no window is chosen.
    pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

    /// Creates a window.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidTimeRange`] if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(QueryError::InvalidTimeRange {
                start: format_instant(start),
                end: format_instant(end),
            }
            .into());
        }
        Ok(Self { start, end })
    }

    /// The window of length `lookback` ending at `end`.
    ///
    /// A negative `lookback` is treated as zero. A lookback reaching past the
    /// earliest representable instant starts the window at
    /// [`DateTime::<Utc>::MIN_UTC`].
    pub fn ending_at(end: DateTime<Utc>, lookback: Duration) -> Self {
        let lookback = lookback.max(Duration::zero());
        Self {
            start: end
                .checked_sub_signed(lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end,
        }
    }

    /// The last seven days ending now.
    pub fn last_week() -> Self {
        Self::ending_at(Utc::now(), Duration::days(Self::DEFAULT_LOOKBACK_DAYS))
    }

    /// Start of the window.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// End of the window.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Start rendered the way the backend expects it.
    pub fn start_param(&self) -> String {
        format_instant(self.start)
    }

    /// End rendered the way the backend expects it.
    pub fn end_param(&self) -> String {
        format_instant(self.end)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start_param(), self.end_param())
    }
}

/// RFC 3339, UTC, millisecond precision: `2024-05-01T12:00:00.000Z`.
fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `GET /devices` response body.
#[derive(Debug, Deserialize)]
struct DevicesBody {
    devices: Vec<DeviceId>,
}

/// `GET /devices/{id}/data` response body.
#[derive(Debug, Deserialize)]
struct SeriesBody {
    data: Vec<WireReading>,
}

/// One element of the per-device series, in the backend's field naming.
#[derive(Debug, Deserialize)]
struct WireReading {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "PM10", deserialize_with = "numeric_text")]
    pm10: String,
    #[serde(rename = "PM25", deserialize_with = "numeric_text")]
    pm25: String,
}

/// Accepts a JSON string or number and keeps it as text.
fn numeric_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        Str(String),
        Num(serde_json::Number),
    }

    Ok(match Text::deserialize(deserializer)? {
        Text::Str(s) => s,
        Text::Num(n) => n.to_string(),
    })
}

/// Body the per-device endpoint sends with its 404 when a device has no
/// stored readings.
#[derive(Debug, Deserialize)]
struct MessageBody {
    message: String,
}

/// Whether a 404 body is the backend's "no data" answer rather than an
/// unknown route.
pub(crate) fn is_no_data(body: &[u8]) -> bool {
    serde_json::from_slice::<MessageBody>(body)
        .is_ok_and(|b| b.message.starts_with("No data found"))
}

/// Decodes a `GET /devices` body into device identifiers.
pub(crate) fn decode_devices(body: &[u8]) -> serde_json::Result<Vec<DeviceId>> {
    serde_json::from_slice::<DevicesBody>(body).map(|b| b.devices)
}

/// Decodes a `GET /devices/{id}/data` body, stamping each reading with `device`.
pub(crate) fn decode_series(device: &DeviceId, body: &[u8]) -> serde_json::Result<Vec<RawReading>> {
    let body: SeriesBody = serde_json::from_slice(body)?;
    Ok(body
        .data
        .into_iter()
        .map(|w| RawReading {
            device_id: device.clone(),
            timestamp: w.timestamp,
            pm10: w.pm10,
            pm25: w.pm25,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_rejects_reversed_range() {
        let start = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

        let err = TimeWindow::new(start, end).unwrap_err();
        assert!(matches!(
            err,
            crate::AirwatchError::Query(QueryError::InvalidTimeRange { .. })
        ));

        // Equal endpoints are a valid, empty-width window.
        assert!(TimeWindow::new(start, start).is_ok());
    }

    #[test]
    fn test_window_params_are_utc_millis() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let window = TimeWindow::ending_at(start + Duration::hours(1), Duration::hours(1));

        assert_eq!(window.start(), start);
        assert_eq!(window.start_param(), "2024-05-01T12:00:00.000Z");
        assert_eq!(window.end_param(), "2024-05-01T13:00:00.000Z");
    }

    #[test]
    fn test_negative_lookback_is_clamped() {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let window = TimeWindow::ending_at(end, Duration::hours(-3));
        assert_eq!(window.start(), window.end());
    }

    #[test]
    fn test_oversized_lookback_starts_at_min_instant() {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let window = TimeWindow::ending_at(end, Duration::days(100_000_000));

        assert_eq!(window.start(), DateTime::<Utc>::MIN_UTC);
        assert_eq!(window.end(), end);
        assert!(window.start() <= window.end());
        // Rendering the clamped bound must not fail either.
        assert!(!window.start_param().is_empty());
    }

    #[test]
    fn test_is_no_data() {
        assert!(is_no_data(br#"{"message": "No data found for device wall-e-1"}"#));
        assert!(!is_no_data(br#"{"message": "Not Found"}"#));
        assert!(!is_no_data(b"<html>404 Not Found</html>"));
        assert!(!is_no_data(b""));
    }

    #[test]
    fn test_decode_devices() {
        let devices = decode_devices(br#"{"devices": ["wall-e-1", "wall-e-2"]}"#).unwrap();
        assert_eq!(devices, vec![DeviceId::from("wall-e-1"), DeviceId::from("wall-e-2")]);

        let empty = decode_devices(br#"{"devices": []}"#).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_decode_devices_shape_mismatch() {
        assert!(decode_devices(br#"{"items": ["a"]}"#).is_err());
        assert!(decode_devices(br#"["a", "b"]"#).is_err());
    }

    #[test]
    fn test_decode_series_maps_capitalised_fields() {
        let body = br#"{"data": [
            {"DeviceID": "other", "Timestamp": "2024-05-01T12:00:00Z", "PM10": "12.5", "PM25": "7.25"},
            {"Timestamp": "2024-05-01T12:01:00Z", "PM10": 13, "PM25": 8.5}
        ]}"#;
        let device = DeviceId::from("wall-e-1");

        let readings = decode_series(&device, body).unwrap();

        assert_eq!(readings.len(), 2);
        assert_eq!(
            readings[0],
            RawReading::new("wall-e-1", "2024-05-01T12:00:00Z", "12.5", "7.25")
        );
        // Numbers are accepted and kept as text.
        assert_eq!(readings[1].pm10, "13");
        assert_eq!(readings[1].pm25, "8.5");
        assert!(readings.iter().all(|r| r.device_id == device));
    }

    #[test]
    fn test_decode_series_missing_field() {
        let device = DeviceId::from("wall-e-1");
        let body = br#"{"data": [{"Timestamp": "2024-05-01T12:00:00Z", "PM10": "1"}]}"#;
        assert!(decode_series(&device, body).is_err());
    }
}
