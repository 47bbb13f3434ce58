//! Summary statistics over readings and chart points.
//!
//! Values that do not parse as finite numbers are excluded from both the sum
//! and the count. An input with nothing to average yields `0.0`.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::normalize::{NormalizedPoint, parse_concentration};
use crate::reading::RawReading;

/// A measured concentration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    /// Particulate matter up to 10 µm.
    Pm10,
    /// Particulate matter up to 2.5 µm.
    Pm25,
}

impl Field {
    /// Both fields, in display order.
    pub const ALL: [Self; 2] = [Self::Pm10, Self::Pm25];

    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pm10 => "PM10",
            Self::Pm25 => "PM2.5",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pm10" => Ok(Self::Pm10),
            "pm25" | "pm2.5" => Ok(Self::Pm25),
            _ => Err(format!("Unknown field '{s}' (expected pm10 or pm25)")),
        }
    }
}

/// Records that carry concentration values.
pub trait FieldValues {
    /// The field's value, or `None` if it is missing or not a finite number.
    fn field_value(&self, field: Field) -> Option<f64>;
}

impl FieldValues for RawReading {
    fn field_value(&self, field: Field) -> Option<f64> {
        match field {
            Field::Pm10 => parse_concentration(&self.pm10),
            Field::Pm25 => parse_concentration(&self.pm25),
        }
    }
}

impl FieldValues for NormalizedPoint {
    fn field_value(&self, field: Field) -> Option<f64> {
        let value = match field {
            Field::Pm10 => self.pm10,
            Field::Pm25 => self.pm25,
        };
        value.is_finite().then_some(value)
    }
}

/// Arithmetic mean of `field` over `records`.
///
/// Returns `0.0` for an empty input, or when no element has a usable value.
#[allow(clippy::cast_precision_loss)]
pub fn average<R: FieldValues>(records: &[R], field: Field) -> f64 {
    let (sum, count) = records
        .iter()
        .filter_map(|r| r.field_value(field))
        .fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Largest value of `field`, if any element has one.
pub fn maximum<R: FieldValues>(records: &[R], field: Field) -> Option<f64> {
    records
        .iter()
        .filter_map(|r| r.field_value(field))
        .reduce(f64::max)
}

/// Aggregates for one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldSummary {
    /// Mean over the usable values.
    pub avg: f64,
    /// Largest usable value.
    pub max: Option<f64>,
}

impl FieldSummary {
    fn of<R: FieldValues>(records: &[R], field: Field) -> Self {
        Self {
            avg: average(records, field),
            max: maximum(records, field),
        }
    }
}

/// Per-field aggregates over a record set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    /// Number of records considered.
    pub count: usize,
    /// PM10 aggregates.
    pub pm10: FieldSummary,
    /// PM2.5 aggregates.
    pub pm25: FieldSummary,
}

impl Summary {
    /// Summarizes `records`.
    pub fn of<R: FieldValues>(records: &[R]) -> Self {
        Self {
            count: records.len(),
            pm10: FieldSummary::of(records, Field::Pm10),
            pm25: FieldSummary::of(records, Field::Pm25),
        }
    }

    /// The aggregates of `field`.
    pub fn field(&self, field: Field) -> &FieldSummary {
        match field {
            Field::Pm10 => &self.pm10,
            Field::Pm25 => &self.pm25,
        }
    }
}

/// Upper bound of the chart's y axis: the largest value of either field plus
/// ten percent, rounded up. Never below zero.
pub fn y_axis_max(points: &[NormalizedPoint]) -> f64 {
    let top = Field::ALL
        .into_iter()
        .filter_map(|field| maximum(points, field))
        .fold(0.0, f64::max);
    (top * 1.1).ceil()
}

/// Renders a concentration with two decimals and its unit.
pub fn format_concentration(value: f64) -> String {
    format!("{value:.2} µg/m³")
}
