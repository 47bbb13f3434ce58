//! The seam between the data layer and the backend.
//!
//! [`DataSource`] covers the two read operations the dashboard needs: the
//! device registry and the per-device series. [`crate::http::HttpSource`] is
//! the production implementation; tests substitute scripted sources.

use std::future::Future;
use std::sync::Arc;

use crate::error::TransportError;
use crate::reading::{DeviceId, RawReading, TimeWindow};

/// Read access to the device registry and per-device series.
///
/// Implementations must not retry internally. Retrying happens through the
/// query cache's next poll.
pub trait DataSource: Send + Sync {
    /// Lists every known device.
    ///
    /// An empty list is a valid answer, distinct from failure.
    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceId>, TransportError>> + Send;

    /// Fetches one device's readings within `window`.
    ///
    /// A device with no readings in the window yields an empty series.
    fn fetch_series(
        &self,
        device: &DeviceId,
        window: &TimeWindow,
    ) -> impl Future<Output = Result<Vec<RawReading>, TransportError>> + Send;
}

impl<S: DataSource> DataSource for Arc<S> {
    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceId>, TransportError>> + Send {
        (**self).list_devices()
    }

    fn fetch_series(
        &self,
        device: &DeviceId,
        window: &TimeWindow,
    ) -> impl Future<Output = Result<Vec<RawReading>, TransportError>> + Send {
        (**self).fetch_series(device, window)
    }
}
