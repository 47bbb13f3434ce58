//! Keyed query cache with request de-duplication and background polling.
//!
//! The cache turns the fetch operations into a continuously refreshed value
//! per [`QueryKey`]. Each key moves through
//! `Idle → Fetching → {Settled | Failed} → Fetching → …`.
//!
//! # Guarantees
//!
//! - At most one request per key is in flight. Concurrent [`QueryCache::fetch`]
//!   calls for the same key share the in-flight operation and observe the same
//!   `Arc`'d value.
//! - A result is stored only into the entry and dispatch that issued it. A
//!   [`Subscription`] reads only its current key, so a late response for a
//!   superseded key never becomes its current value. If the entry is gone by
//!   the time the response arrives, the response is discarded.
//! - A failed refresh keeps the previous value. The snapshot exposes both the
//!   value and the error.
//! - In-flight requests run as their own tasks and are never aborted. Only
//!   pollers are cancelled.
//!
//! # Polling
//!
//! [`QueryCache::watch`] attaches an observer to a key. The first observer
//! starts the key's poller, which fetches immediately and then once per
//! refresh interval after each settle or failure. The poller is cancelled
//! when the last observer detaches. Entries that stay unobserved for the
//! configured cache time are evicted lazily.
//!
//! # Example
//!
//! ```rust,no_run
//! use airwatch::cache::{QueryCache, QueryKey};
//! use airwatch::config::ClientConfig;
//! use airwatch::http::HttpSource;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::default();
//! let cache = QueryCache::new(HttpSource::new(&config)?, &config);
//!
//! let devices = cache.watch(Some(QueryKey::AllDevices));
//! let mut changes = cache.changes();
//! changes.changed().await?;
//! println!("{:?}", devices.snapshot().status);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{AirwatchError, QueryError};
use crate::fanout;
use crate::reading::{DeviceId, RawReading, TimeWindow};
use crate::source::DataSource;

/// Identifies one cached, independently polled query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// The device registry.
    AllDevices,
    /// Merged readings of a device set over a window.
    AllData {
        /// The queried window.
        window: TimeWindow,
        /// Sorted, de-duplicated device set.
        devices: Vec<DeviceId>,
    },
    /// Readings of a single device over a window.
    DeviceData {
        /// The queried device.
        device: DeviceId,
        /// The queried window.
        window: TimeWindow,
    },
}

impl QueryKey {
    /// Builds an `AllData` key.
    ///
    /// The device set is sorted and de-duplicated, so the same set in any order
    /// maps to the same key and a different set maps to a different one.
    pub fn all_data(window: TimeWindow, devices: impl IntoIterator<Item = DeviceId>) -> Self {
        let mut devices: Vec<DeviceId> = devices.into_iter().collect();
        devices.sort();
        devices.dedup();
        Self::AllData { window, devices }
    }

    /// Builds a `DeviceData` key.
    pub fn device_data(device: DeviceId, window: TimeWindow) -> Self {
        Self::DeviceData { device, window }
    }

    /// Whether the key's preconditions hold so a fetch may be issued.
    ///
    /// `AllData` needs a non-empty device set and `DeviceData` a non-empty
    /// device id. Windows always have both endpoints by construction.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::AllDevices => true,
            Self::AllData { devices, .. } => !devices.is_empty(),
            Self::DeviceData { device, .. } => !device.is_empty(),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllDevices => write!(f, "allDevices"),
            Self::AllData { window, devices } => {
                let names: Vec<&str> = devices.iter().map(DeviceId::as_str).collect();
                write!(f, "allData[{window}; {}]", names.join(","))
            }
            Self::DeviceData { device, window } => write!(f, "deviceData[{device}; {window}]"),
        }
    }
}

/// The value a query settles with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    /// Result of [`QueryKey::AllDevices`].
    Devices(Vec<DeviceId>),
    /// Result of [`QueryKey::AllData`] or [`QueryKey::DeviceData`].
    Readings(Vec<RawReading>),
}

impl QueryValue {
    /// The device list, if this is a registry result.
    pub fn as_devices(&self) -> Option<&[DeviceId]> {
        match self {
            Self::Devices(devices) => Some(devices),
            Self::Readings(_) => None,
        }
    }

    /// The readings, if this is a series result.
    pub fn as_readings(&self) -> Option<&[RawReading]> {
        match self {
            Self::Readings(readings) => Some(readings),
            Self::Devices(_) => None,
        }
    }
}

/// Outcome shared between every waiter of one dispatch.
pub type QueryOutcome = Result<Arc<QueryValue>, Arc<AirwatchError>>;

type InFlight = Shared<BoxFuture<'static, QueryOutcome>>;

/// Where a key is in its fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Never fetched, or not allowed to fetch yet.
    Idle,
    /// A request is in flight.
    Fetching,
    /// The latest request succeeded.
    Settled,
    /// The latest request failed.
    Failed,
}

/// Point-in-time copy of one cache entry.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    /// Current state of the key.
    pub status: QueryStatus,
    /// Last successfully fetched value, kept across later failures.
    pub value: Option<Arc<QueryValue>>,
    /// Error of the latest request, cleared by the next success.
    pub error: Option<Arc<AirwatchError>>,
    /// Whether a request is in flight. A refresh can be in flight while an
    /// older value is shown.
    pub is_fetching: bool,
    /// When the latest request completed.
    pub last_fetched: Option<DateTime<Utc>>,
    /// Number of completed requests for this key.
    pub fetch_count: u64,
}

impl QuerySnapshot {
    fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            value: None,
            error: None,
            is_fetching: false,
            last_fetched: None,
            fetch_count: 0,
        }
    }
}

#[derive(Default)]
struct Entry {
    value: Option<Arc<QueryValue>>,
    error: Option<Arc<AirwatchError>>,
    in_flight: Option<InFlight>,
    dispatch: u64,
    last_fetched: Option<DateTime<Utc>>,
    fetch_count: u64,
    observers: usize,
    poller: Option<JoinHandle<()>>,
    idle_since: Option<Instant>,
}

impl Entry {
    fn snapshot(&self) -> QuerySnapshot {
        let is_fetching = self.in_flight.is_some();
        let status = if is_fetching {
            QueryStatus::Fetching
        } else if self.error.is_some() {
            QueryStatus::Failed
        } else if self.value.is_some() {
            QueryStatus::Settled
        } else {
            QueryStatus::Idle
        };

        QuerySnapshot {
            status,
            value: self.value.clone(),
            error: self.error.clone(),
            is_fetching,
            last_fetched: self.last_fetched,
            fetch_count: self.fetch_count,
        }
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<QueryKey, Entry>,
    next_dispatch: u64,
}

struct Inner<S> {
    source: S,
    refresh_interval: Duration,
    cache_time: Duration,
    state: Mutex<State>,
    changes: watch::Sender<u64>,
}

impl<S> Inner<S> {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }
}

/// Shared handle to the query cache. Cloning is cheap.
pub struct QueryCache<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for QueryCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: DataSource + 'static> QueryCache<S> {
    /// Creates a cache over `source` using the config's refresh interval and
    /// cache time.
    pub fn new(source: S, config: &ClientConfig) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                source,
                refresh_interval: config.refresh_interval,
                cache_time: config.cache_time,
                state: Mutex::new(State::default()),
                changes,
            }),
        }
    }

    /// The underlying data source.
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// Receiver whose version bumps on every cache state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    /// Fetches `key`, joining the in-flight request if there is one.
    ///
    /// The result is also stored in the cache. Dropping the returned future
    /// does not cancel the underlying request.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotReady`] without fetching if the key's
    /// preconditions do not hold, or the shared fetch error.
    pub async fn fetch(&self, key: &QueryKey) -> QueryOutcome {
        if !key.is_enabled() {
            return Err(Arc::new(
                QueryError::NotReady {
                    key: key.to_string(),
                }
                .into(),
            ));
        }
        self.begin(key).await
    }

    /// Current snapshot of `key`, or `None` if the cache has no entry for it.
    pub fn snapshot(&self, key: &QueryKey) -> Option<QuerySnapshot> {
        self.inner.lock().entries.get(key).map(Entry::snapshot)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attaches an observer to `key` and returns its subscription.
    ///
    /// `None`, or a key whose preconditions do not hold, yields an idle
    /// subscription that never fetches. Otherwise the key enters
    /// [`QueryStatus::Fetching`] before this returns, unless it is already
    /// polled.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, since the first observer of
    /// a key spawns its fetch and poller tasks.
    pub fn watch(&self, key: Option<QueryKey>) -> Subscription<S> {
        if let Some(key) = &key {
            self.attach(key);
        }
        Subscription {
            cache: self.clone(),
            key,
        }
    }

    /// Drops every entry and cancels every poller.
    ///
    /// Requests still in flight complete, but their results are discarded.
    /// Existing subscriptions read as idle until they switch keys.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        for entry in state.entries.values_mut() {
            entry.stop_poller();
        }
        let dropped = state.entries.len();
        state.entries.clear();
        drop(state);
        debug!("cleared {dropped} cache entr(ies)");
        self.inner.notify();
    }

    /// Removes entries that have been unobserved and idle for longer than the
    /// cache time. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let mut state = self.inner.lock();
        let evicted = Self::evict_idle_locked(&mut state, self.inner.cache_time);
        drop(state);
        if evicted > 0 {
            debug!("evicted {evicted} idle cache entr(ies)");
            self.inner.notify();
        }
        evicted
    }

    fn evict_idle_locked(state: &mut State, cache_time: Duration) -> usize {
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| {
            entry.observers > 0
                || entry.in_flight.is_some()
                || entry
                    .idle_since
                    .is_none_or(|since| now.duration_since(since) < cache_time)
        });
        before - state.entries.len()
    }

    /// Returns the in-flight request for `key`, dispatching one if needed.
    fn begin(&self, key: &QueryKey) -> InFlight {
        let mut state = self.inner.lock();
        Self::evict_idle_locked(&mut state, self.inner.cache_time);
        let in_flight = self.begin_locked(&mut state, key);
        drop(state);

        self.inner.notify();
        in_flight
    }

    /// Dispatches or joins the request for `key` while the state is locked.
    fn begin_locked(&self, state: &mut State, key: &QueryKey) -> InFlight {
        state.next_dispatch += 1;
        let dispatch = state.next_dispatch;
        let entry = state.entries.entry(key.clone()).or_default();
        if let Some(in_flight) = &entry.in_flight {
            debug!("joining in-flight fetch for {key}");
            return in_flight.clone();
        }

        entry.dispatch = dispatch;
        let task = {
            let cache = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let outcome = run_query(&cache.inner.source, &key)
                    .await
                    .map(Arc::new)
                    .map_err(Arc::new);
                cache.settle(&key, dispatch, &outcome);
                outcome
            })
        };

        let task_key = key.to_string();
        let in_flight = task
            .map(move |joined| {
                joined.unwrap_or_else(|e| {
                    Err(Arc::new(
                        QueryError::TaskFailed {
                            key: task_key,
                            reason: e.to_string(),
                        }
                        .into(),
                    ))
                })
            })
            .boxed()
            .shared();
        entry.in_flight = Some(in_flight.clone());

        debug!("dispatched fetch #{dispatch} for {key}");
        in_flight
    }

    /// Stores an outcome into the entry that dispatched it.
    fn settle(&self, key: &QueryKey, dispatch: u64, outcome: &QueryOutcome) {
        let mut state = self.inner.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            debug!("discarding result of fetch #{dispatch}: {key} is no longer cached");
            return;
        };
        if entry.dispatch != dispatch || entry.in_flight.is_none() {
            debug!("discarding stale result of fetch #{dispatch} for {key}");
            return;
        }

        entry.in_flight = None;
        entry.fetch_count += 1;
        entry.last_fetched = Some(Utc::now());
        if entry.observers == 0 {
            entry.idle_since = Some(Instant::now());
        }
        match outcome {
            Ok(value) => {
                entry.value = Some(Arc::clone(value));
                entry.error = None;
            }
            Err(error) => {
                warn!("fetch for {key} failed: {error}");
                entry.error = Some(Arc::clone(error));
            }
        }
        drop(state);
        self.inner.notify();
    }

    fn attach(&self, key: &QueryKey) {
        let mut state = self.inner.lock();
        Self::evict_idle_locked(&mut state, self.inner.cache_time);

        let entry = state.entries.entry(key.clone()).or_default();
        entry.observers += 1;
        entry.idle_since = None;
        if entry.poller.is_none() && key.is_enabled() {
            // The first fetch is dispatched here so the key reads as
            // fetching before the poller task is scheduled.
            let first = self.begin_locked(&mut state, key);
            let poller = self.spawn_poller(key.clone(), first);
            if let Some(entry) = state.entries.get_mut(key) {
                entry.poller = Some(poller);
            }
        }
        drop(state);
        self.inner.notify();
    }

    fn detach(&self, key: &QueryKey) {
        let mut state = self.inner.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        entry.observers = entry.observers.saturating_sub(1);
        if entry.observers == 0 {
            if entry.poller.is_some() {
                info!("stopping poller for {key}");
            }
            entry.stop_poller();
            entry.idle_since = Some(Instant::now());
        }
    }

    /// Polls `key`: waits for `first`, then fetches once per refresh
    /// interval.
    ///
    /// The task holds only a weak reference, so it ends on its own once the
    /// cache is gone.
    fn spawn_poller(&self, key: QueryKey, first: InFlight) -> JoinHandle<()> {
        let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
        let interval = self.inner.refresh_interval;
        info!("starting poller for {key} every {interval:?}");

        tokio::spawn(async move {
            let mut in_flight = first;
            loop {
                // Failures are already recorded on the entry; the next tick
                // is the retry.
                let _ = in_flight.await;
                tokio::time::sleep(interval).await;

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                in_flight = QueryCache { inner }.begin(&key);
            }
        })
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in state.entries.values_mut() {
            entry.stop_poller();
        }
    }
}

/// Runs the operation a key stands for.
async fn run_query<S: DataSource>(source: &S, key: &QueryKey) -> crate::Result<QueryValue> {
    match key {
        QueryKey::AllDevices => Ok(QueryValue::Devices(source.list_devices().await?)),
        QueryKey::AllData { window, devices } => Ok(QueryValue::Readings(
            fanout::fetch_all(source, window, devices).await?,
        )),
        QueryKey::DeviceData { device, window } => Ok(QueryValue::Readings(
            source.fetch_series(device, window).await?,
        )),
    }
}

/// One consumer's attachment to a (possibly changing) key.
///
/// Dropping the subscription detaches it.
pub struct Subscription<S: DataSource + 'static> {
    cache: QueryCache<S>,
    key: Option<QueryKey>,
}

impl<S: DataSource + 'static> Subscription<S> {
    /// The active key, if any.
    pub fn key(&self) -> Option<&QueryKey> {
        self.key.as_ref()
    }

    /// Switches to `key`.
    ///
    /// The old key is detached but keeps its cached value. The new key starts
    /// fetching immediately. Setting the same key again does nothing.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime when `key` needs a new poller.
    pub fn set_key(&mut self, key: Option<QueryKey>) {
        if self.key == key {
            return;
        }
        if let Some(old) = self.key.take() {
            self.cache.detach(&old);
        }
        if let Some(new) = &key {
            debug!("subscription switched to {new}");
            self.cache.attach(new);
        }
        self.key = key;
    }

    /// Snapshot of the active key. Idle when there is no key or no entry.
    pub fn snapshot(&self) -> QuerySnapshot {
        self.key
            .as_ref()
            .and_then(|key| self.cache.snapshot(key))
            .unwrap_or_else(QuerySnapshot::idle)
    }

    /// Fetches the active key now, joining any in-flight request.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotReady`] if there is no active key or its
    /// preconditions do not hold, or the shared fetch error.
    pub async fn refetch(&self) -> QueryOutcome {
        match &self.key {
            Some(key) => self.cache.fetch(key).await,
            None => Err(Arc::new(
                QueryError::NotReady {
                    key: "<none>".to_string(),
                }
                .into(),
            )),
        }
    }
}

impl<S: DataSource + 'static> Drop for Subscription<S> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.cache.detach(&key);
        }
    }
}
