//! Concurrent fan-out of one time-window query across many devices.
//!
//! [`fetch_all`] issues every per-device request at once inside the calling
//! task and joins them only at the end, so total latency tracks the slowest
//! device rather than the sum. Every outcome is collected before the
//! all-or-nothing policy is applied: either every device contributes, or the
//! call fails with an [`AggregateFetchError`] naming each failing device.
//!
//! The merged sequence is a concatenation in request order, but callers must
//! not assume it is sorted by timestamp.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{AggregateFetchError, DeviceFailure, Result};
use crate::reading::{DeviceId, RawReading, TimeWindow};
use crate::source::DataSource;

/// Fetches and merges readings for `devices` over `window`.
///
/// An empty `devices` slice means "every known device": the registry is
/// resolved first and the fan-out targets exactly the devices it returns. An
/// empty registry yields an empty result, not an error.
///
/// # Errors
///
/// Returns a `TransportError` if the registry lookup fails, or an
/// [`AggregateFetchError`] if one or more device fetches fail.
pub async fn fetch_all<S: DataSource>(
    source: &S,
    window: &TimeWindow,
    devices: &[DeviceId],
) -> Result<Vec<RawReading>> {
    let resolved;
    let devices = if devices.is_empty() {
        resolved = source.list_devices().await?;
        debug!("resolved {} device(s) from registry for fan-out", resolved.len());
        resolved.as_slice()
    } else {
        devices
    };

    let mut requests = Vec::with_capacity(devices.len());
    for device in devices {
        requests.push(async move { (device, source.fetch_series(device, window).await) });
    }
    let outcomes = join_all(requests).await;

    let mut merged = Vec::new();
    let mut failures = Vec::new();
    for (device, outcome) in outcomes {
        match outcome {
            Ok(readings) => merged.extend(readings),
            Err(error) => {
                warn!("fetch for device {device} failed: {error}");
                failures.push(DeviceFailure {
                    device: device.clone(),
                    error,
                });
            }
        }
    }

    if !failures.is_empty() {
        return Err(AggregateFetchError { failures }.into());
    }

    debug!(
        "merged {} reading(s) from {} device(s) for {window}",
        merged.len(),
        devices.len()
    );
    Ok(merged)
}
