//! Conversion of raw readings into chart-ready points.
//!
//! Normalization is a pure, order-preserving map. A record whose timestamp
//! or concentration cannot be parsed is dropped on its own; the rest of the
//! batch is unaffected.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::debug;

use crate::reading::RawReading;

/// Display format of [`NormalizedPoint::timestamp`].
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Naive timestamp forms accepted besides RFC 3339. They are read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", TIMESTAMP_FORMAT];

/// One chart point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedPoint {
    /// Local time, formatted with [`TIMESTAMP_FORMAT`].
    pub timestamp: String,
    /// PM10 concentration.
    pub pm10: f64,
    /// PM2.5 concentration.
    pub pm25: f64,
}

/// Normalizes `readings`, rendering timestamps in the host's local zone.
pub fn normalize(readings: &[RawReading]) -> Vec<NormalizedPoint> {
    normalize_in(readings, &Local)
}

/// Normalizes `readings`, rendering timestamps in `zone`.
pub fn normalize_in<Tz>(readings: &[RawReading], zone: &Tz) -> Vec<NormalizedPoint>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let points: Vec<NormalizedPoint> = readings
        .iter()
        .filter_map(|reading| normalize_one(reading, zone))
        .collect();

    let dropped = readings.len() - points.len();
    if dropped > 0 {
        debug!("dropped {dropped} unparseable reading(s) during normalization");
    }
    points
}

fn normalize_one<Tz>(reading: &RawReading, zone: &Tz) -> Option<NormalizedPoint>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let instant = parse_timestamp(&reading.timestamp)?;
    Some(NormalizedPoint {
        timestamp: instant
            .with_timezone(zone)
            .format(TIMESTAMP_FORMAT)
            .to_string(),
        pm10: parse_concentration(&reading.pm10)?,
        pm25: parse_concentration(&reading.pm25)?,
    })
}

/// Parses a backend timestamp. Returns `None` for unrecognized input.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// Parses a concentration. Returns `None` unless it is a finite number.
pub fn parse_concentration(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
