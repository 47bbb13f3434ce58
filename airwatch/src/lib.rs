//! # airwatch
//!
//! Data acquisition and aggregation layer for a particulate-matter
//! monitoring dashboard.
//!
//! airwatch discovers the sensor devices known to a backend, fans out
//! time-ranged queries to one or many of them, and keeps the merged results
//! in a keyed cache that refreshes itself on a fixed interval. It then
//! derives chart-ready series and summary statistics (PM10, PM2.5) from the
//! cached readings.
//!
//! ## Key Properties
//!
//! - At most one request per cache key in flight; concurrent callers share it
//! - All-or-nothing fan-out that names every failing device
//! - A late response never overwrites the value of a newer key
//! - A failed refresh keeps the last good value visible next to the error
//! - Per-record parse failures never abort a batch
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use airwatch::{ClientConfig, HttpSource, TimeWindow, fanout, normalize, stats};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("http://air.local:5000");
//! let source = HttpSource::new(&config)?;
//!
//! // Every known device over the last seven days
//! let readings = fanout::fetch_all(&source, &TimeWindow::last_week(), &[]).await?;
//!
//! let points = normalize::normalize(&readings);
//! let avg = stats::average(&points, stats::Field::Pm25);
//! println!("{} points, PM2.5 avg {}", points.len(), stats::format_concentration(avg));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`source`]: The `DataSource` trait: device registry and per-device series
//! - [`http`]: `DataSource` over the backend's HTTP endpoints
//! - [`fanout`]: Concurrent multi-device fetch with all-or-nothing merge
//! - [`cache`]: Keyed query cache with de-duplication and polling
//! - [`normalize`]: Raw readings to chart points
//! - [`stats`]: Averages, maxima and chart bounds
//! - [`dashboard`]: Dashboard state driving the cache
//! - [`reading`]: Device, reading and time-window types
//! - [`config`]: Client configuration
//! - [`error`]: Error types

pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fanout;
pub mod http;
pub mod normalize;
pub mod reading;
pub mod source;
pub mod stats;

// Re-export primary API types at crate root for convenience.
pub use cache::{QueryCache, QueryKey, QuerySnapshot, QueryStatus, QueryValue, Subscription};
pub use config::ClientConfig;
pub use dashboard::{Dashboard, DashboardState, DashboardView, PanelView};
pub use error::{
    AggregateFetchError, AirwatchError, ConfigError, QueryError, Result, TransportError,
};
pub use http::HttpSource;
pub use normalize::NormalizedPoint;
pub use reading::{DeviceId, RawReading, TimeWindow};
pub use source::DataSource;
pub use stats::{Field, Summary};
