//! Scripted `DataSource` shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use airwatch::error::TransportError;
use airwatch::reading::{DeviceId, RawReading, TimeWindow};
use airwatch::source::DataSource;
use chrono::TimeZone;

/// What one call for a device returns. The last step of a script repeats.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Succeed with this many readings.
    Readings(usize),
    /// Fail with HTTP 500.
    Fail,
}

#[derive(Default)]
struct Script {
    registry: VecDeque<Option<Vec<DeviceId>>>,
    series: HashMap<DeviceId, VecDeque<Step>>,
    delays: HashMap<DeviceId, Duration>,
    series_calls: HashMap<DeviceId, usize>,
}

/// A source whose answers are set up in advance.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<Script>,
    registry_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry answers, in order. `None` is a failure.
    pub fn with_registry(self, devices: &[&str]) -> Self {
        self.push_registry(Some(devices.iter().map(|d| DeviceId::from(*d)).collect()));
        self
    }

    pub fn with_failing_registry(self) -> Self {
        self.push_registry(None);
        self
    }

    pub fn push_registry(&self, answer: Option<Vec<DeviceId>>) {
        self.script.lock().unwrap().registry.push_back(answer);
    }

    pub fn with_series(self, device: &str, steps: &[Step]) -> Self {
        self.script
            .lock()
            .unwrap()
            .series
            .insert(DeviceId::from(device), steps.iter().copied().collect());
        self
    }

    pub fn with_delay(self, device: &str, delay: Duration) -> Self {
        self.script
            .lock()
            .unwrap()
            .delays
            .insert(DeviceId::from(device), delay);
        self
    }

    pub fn registry_calls(&self) -> usize {
        self.registry_calls.load(Ordering::SeqCst)
    }

    pub fn series_calls(&self, device: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .series_calls
            .get(&DeviceId::from(device))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_series_calls(&self) -> usize {
        self.script.lock().unwrap().series_calls.values().sum()
    }

    fn next_registry(&self) -> Option<Vec<DeviceId>> {
        self.registry_calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.registry.len() > 1 {
            script.registry.pop_front().unwrap_or_default()
        } else {
            script.registry.front().cloned().unwrap_or(Some(Vec::new()))
        }
    }

    fn next_series(&self, device: &DeviceId) -> (Step, Option<Duration>, usize) {
        let mut script = self.script.lock().unwrap();
        let calls = script.series_calls.entry(device.clone()).or_insert(0);
        *calls += 1;
        let call = *calls;

        let step = match script.series.get_mut(device) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap_or(Step::Readings(0)),
            Some(steps) => steps.front().copied().unwrap_or(Step::Readings(0)),
            None => Step::Readings(0),
        };
        (step, script.delays.get(device).copied(), call)
    }
}

/// Readings for `device`, tagged with the call number in PM2.5.
pub fn readings(device: &DeviceId, count: usize, call: usize) -> Vec<RawReading> {
    let base = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let at = base + chrono::Duration::minutes(i64::try_from(i).unwrap());
            RawReading::new(
                device.clone(),
                at.to_rfc3339(),
                format!("{}", 10 + i),
                format!("{call}"),
            )
        })
        .collect()
}

pub fn scripted_failure(device: &DeviceId) -> TransportError {
    TransportError::HttpStatus {
        url: format!("scripted://devices/{device}/data"),
        status: 500,
        body: "scripted failure".to_string(),
    }
}

impl DataSource for ScriptedSource {
    async fn list_devices(&self) -> Result<Vec<DeviceId>, TransportError> {
        self.next_registry().ok_or_else(|| TransportError::HttpStatus {
            url: "scripted://devices".to_string(),
            status: 500,
            body: "scripted failure".to_string(),
        })
    }

    async fn fetch_series(
        &self,
        device: &DeviceId,
        _window: &TimeWindow,
    ) -> Result<Vec<RawReading>, TransportError> {
        let (step, delay, call) = self.next_series(device);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match step {
            Step::Readings(count) => Ok(readings(device, count, call)),
            Step::Fail => Err(scripted_failure(device)),
        }
    }
}

pub fn window() -> TimeWindow {
    let start = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let end = chrono::Utc.with_ymd_and_hms(2024, 5, 8, 0, 0, 0).unwrap();
    TimeWindow::new(start, end).unwrap()
}
