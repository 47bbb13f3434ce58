//! Dashboard state and view assembly.
//!
//! [`Dashboard`] owns the explicit [`DashboardState`] (the selected window
//! and device) and three cache subscriptions: the device registry, the
//! merged data of every known device, and the selected device's data. The
//! data keys are derived from the state and the last known registry, so a
//! change of window, device or device set moves to a new key.

use serde::Serialize;

use crate::cache::{QueryCache, QueryKey, QuerySnapshot, QueryStatus, Subscription};
use crate::normalize::{NormalizedPoint, normalize};
use crate::reading::{DeviceId, TimeWindow};
use crate::source::DataSource;
use crate::stats::{Summary, y_axis_max};

/// The user's selections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardState {
    /// Window shown by both panels.
    pub window: TimeWindow,
    /// Device shown by the device panel.
    pub selected_device: Option<DeviceId>,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            window: TimeWindow::last_week(),
            selected_device: None,
        }
    }
}

/// Everything one panel needs to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelView {
    /// Status of the panel's query.
    pub status: QueryStatus,
    /// Whether a refresh is in flight.
    pub is_fetching: bool,
    /// Error of the latest refresh, shown next to any older data.
    pub error: Option<String>,
    /// Aggregates of the last known readings.
    pub summary: Summary,
    /// Chart series of the last known readings.
    pub series: Vec<NormalizedPoint>,
    /// Chart y-axis bound.
    pub y_axis_max: f64,
}

impl PanelView {
    fn from_snapshot(snapshot: &QuerySnapshot) -> Self {
        let readings = snapshot
            .value
            .as_deref()
            .and_then(|value| value.as_readings())
            .unwrap_or_default();
        let series = normalize(readings);

        Self {
            status: snapshot.status,
            is_fetching: snapshot.is_fetching,
            error: snapshot.error.as_ref().map(ToString::to_string),
            summary: Summary::of(&series),
            y_axis_max: y_axis_max(&series),
            series,
        }
    }
}

/// A render-ready copy of the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    /// Known devices, empty until the registry settles.
    pub devices: Vec<DeviceId>,
    /// Error of the latest registry refresh.
    pub devices_error: Option<String>,
    /// Merged data of every known device.
    pub overall: PanelView,
    /// Data of the selected device, if one is selected.
    pub device: Option<PanelView>,
}

/// Drives the cache from the dashboard state.
pub struct Dashboard<S: DataSource + 'static> {
    state: DashboardState,
    devices: Subscription<S>,
    all_data: Subscription<S>,
    device_data: Subscription<S>,
}

impl<S: DataSource + 'static> Dashboard<S> {
    /// Creates a dashboard and starts polling the device registry.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, since the registry poller is
    /// spawned here. The same holds for every later call that re-keys a panel.
    pub fn new(cache: &QueryCache<S>, state: DashboardState) -> Self {
        let mut dashboard = Self {
            state,
            devices: cache.watch(Some(QueryKey::AllDevices)),
            all_data: cache.watch(None),
            device_data: cache.watch(None),
        };
        dashboard.sync();
        dashboard
    }

    /// Current selections.
    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    /// Last known device list.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.devices
            .snapshot()
            .value
            .as_deref()
            .and_then(|value| value.as_devices())
            .map(<[DeviceId]>::to_vec)
            .unwrap_or_default()
    }

    /// Changes the window shown by both panels.
    pub fn set_window(&mut self, window: TimeWindow) {
        self.state.window = window;
        self.sync();
    }

    /// Selects the device shown by the device panel.
    pub fn select_device(&mut self, device: Option<DeviceId>) {
        self.state.selected_device = device;
        self.sync();
    }

    /// Re-derives the data keys from the state and the last known registry.
    ///
    /// Call after the registry changes. Until a device is chosen, the first
    /// registered device is selected.
    pub fn sync(&mut self) {
        let devices = self.devices();
        if self.state.selected_device.is_none() {
            self.state.selected_device = devices.first().cloned();
        }

        let window = self.state.window;
        let all_data = (!devices.is_empty()).then(|| QueryKey::all_data(window, devices));
        let device_data = self
            .state
            .selected_device
            .clone()
            .map(|device| QueryKey::device_data(device, window));

        self.all_data.set_key(all_data);
        self.device_data.set_key(device_data);
    }

    /// Assembles the current view.
    pub fn view(&self) -> DashboardView {
        let devices = self.devices.snapshot();
        DashboardView {
            devices: self.devices(),
            devices_error: devices.error.as_ref().map(ToString::to_string),
            overall: PanelView::from_snapshot(&self.all_data.snapshot()),
            device: self
                .state
                .selected_device
                .as_ref()
                .map(|_| PanelView::from_snapshot(&self.device_data.snapshot())),
        }
    }

    /// Snapshot of the merged all-devices query.
    pub fn overall_snapshot(&self) -> QuerySnapshot {
        self.all_data.snapshot()
    }

    /// Snapshot of the selected device's query.
    pub fn device_snapshot(&self) -> QuerySnapshot {
        self.device_data.snapshot()
    }
}
