//! CLI for the airwatch air-quality data layer.
//!
//! Provides commands for listing devices, exporting normalized readings,
//! summarizing a window, and watching the polled dashboard.

use std::path::{Path, PathBuf};

use airwatch::dashboard::{Dashboard, DashboardState, DashboardView, PanelView};
use airwatch::stats::{Field, Summary, format_concentration};
use airwatch::{ClientConfig, DataSource, DeviceId, HttpSource, QueryCache, TimeWindow};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Command-line access to the particulate-matter dashboard data layer.
#[derive(Parser)]
#[command(name = "airwatch", version, about)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overriding the config file.
    #[arg(long, global = true, env = "AIRWATCH_BASE_URL")]
    base_url: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List the devices known to the backend.
    Devices {
        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Export normalized readings for one or more devices.
    Data {
        /// Device to include (repeatable). All devices when omitted.
        #[arg(long = "device")]
        devices: Vec<String>,

        #[command(flatten)]
        window: WindowArgs,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Print count, averages and maxima for a window.
    Summary {
        /// Device to include (repeatable). All devices when omitted.
        #[arg(long = "device")]
        devices: Vec<String>,

        #[command(flatten)]
        window: WindowArgs,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Poll the backend and print the dashboard whenever it changes.
    Watch {
        /// Device for the device panel. The first known device when omitted.
        #[arg(long)]
        device: Option<String>,

        #[command(flatten)]
        window: WindowArgs,
    },
}

/// Time window selection shared by the data commands.
#[derive(Args)]
struct WindowArgs {
    /// Window ending now (e.g., "30m", "12h", "7d").
    #[arg(long, default_value = "7d")]
    range: String,

    /// Window start (RFC 3339). Overrides --range.
    #[arg(long, requires = "end")]
    start: Option<String>,

    /// Window end (RFC 3339). Overrides --range.
    #[arg(long, requires = "start")]
    end: Option<String>,
}

/// Output format for command results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON document.
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli.config.as_deref(), cli.base_url)?;

    match cli.command {
        Commands::Devices { format } => cmd_devices(&config, &format).await,
        Commands::Data {
            devices,
            window,
            format,
        } => cmd_data(&config, &devices, &window, &format).await,
        Commands::Summary {
            devices,
            window,
            format,
        } => cmd_summary(&config, &devices, &window, &format).await,
        Commands::Watch { device, window } => cmd_watch(config, device, &window).await,
    }
}

/// Logs go to stderr so stdout stays clean for data.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the config file if given, then applies the base URL override.
fn load_config(
    path: Option<&Path>,
    base_url: Option<String>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(base_url) = base_url {
        config = config.with_base_url(base_url);
    }
    config.validate()?;
    tracing::debug!("using backend {}", config.base_url);
    Ok(config)
}

/// Implements `airwatch devices`.
async fn cmd_devices(
    config: &ClientConfig,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = HttpSource::new(config)?;
    let devices = source.list_devices().await?;

    match format {
        OutputFormat::Csv => {
            println!("# devices={}", devices.len());
            println!("device_id");
            for device in &devices {
                println!("{device}");
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({ "devices": devices });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `airwatch data`.
async fn cmd_data(
    config: &ClientConfig,
    devices: &[String],
    window: &WindowArgs,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let window = resolve_window(window)?;
    let devices: Vec<DeviceId> = devices.iter().map(DeviceId::new).collect();

    let source = HttpSource::new(config)?;
    let readings = airwatch::fanout::fetch_all(&source, &window, &devices).await?;
    let points = airwatch::normalize::normalize(&readings);

    match format {
        OutputFormat::Csv => {
            println!(
                "# window={window}, readings={}, points={}",
                readings.len(),
                points.len()
            );
            println!("timestamp,pm10,pm25");
            for point in &points {
                println!("{},{},{}", point.timestamp, point.pm10, point.pm25);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "start": window.start_param(),
                "end": window.end_param(),
                "devices": devices,
                "count": points.len(),
                "data": points,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `airwatch summary`.
async fn cmd_summary(
    config: &ClientConfig,
    devices: &[String],
    window: &WindowArgs,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let window = resolve_window(window)?;
    let devices: Vec<DeviceId> = devices.iter().map(DeviceId::new).collect();

    let source = HttpSource::new(config)?;
    let readings = airwatch::fanout::fetch_all(&source, &window, &devices).await?;
    let points = airwatch::normalize::normalize(&readings);
    let summary = Summary::of(&points);

    match format {
        OutputFormat::Csv => {
            println!("# window={window}, points={}", summary.count);
            println!("field,avg,max");
            for field in Field::ALL {
                let stats = summary.field(field);
                let max = stats.max.map(|m| m.to_string()).unwrap_or_default();
                println!("{field},{},{max}", stats.avg);
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "start": window.start_param(),
                "end": window.end_param(),
                "summary": summary,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `airwatch watch`.
async fn cmd_watch(
    config: ClientConfig,
    device: Option<String>,
    window: &WindowArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = DashboardState {
        window: resolve_window(window)?,
        selected_device: device.map(DeviceId::from),
    };

    let cache = QueryCache::new(HttpSource::new(&config)?, &config);
    let mut changes = cache.changes();
    let mut dashboard = Dashboard::new(&cache, state);
    tracing::info!(
        "watching {} every {:?}",
        config.base_url,
        config.refresh_interval
    );

    let mut last = String::new();
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                dashboard.sync();
                let line = describe_view(&dashboard.view());
                if line != last {
                    println!("[{}] {line}", Utc::now().format("%H:%M:%S"));
                    last = line;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

/// One-line rendering of the dashboard.
fn describe_view(view: &DashboardView) -> String {
    let mut line = format!(
        "devices={} overall: {}",
        view.devices.len(),
        describe_panel(&view.overall)
    );
    if let Some(error) = &view.devices_error {
        line.push_str(&format!(" | registry error: {error}"));
    }
    if let Some(device) = &view.device {
        line.push_str(&format!(" | device: {}", describe_panel(device)));
    }
    line
}

fn describe_panel(panel: &PanelView) -> String {
    let mut text = format!(
        "{:?} {} pts, PM10 avg {}, PM2.5 avg {}",
        panel.status,
        panel.summary.count,
        format_concentration(panel.summary.pm10.avg),
        format_concentration(panel.summary.pm25.avg),
    );
    if panel.is_fetching {
        text.push_str(" (refreshing)");
    }
    if let Some(error) = &panel.error {
        text.push_str(&format!(" [error: {error}]"));
    }
    text
}

/// Builds the window from explicit bounds or a range ending now.
fn resolve_window(args: &WindowArgs) -> Result<TimeWindow, Box<dyn std::error::Error>> {
    if let (Some(start), Some(end)) = (&args.start, &args.end) {
        let start = DateTime::parse_from_rfc3339(start)
            .map_err(|e| format!("Invalid --start '{start}': {e}"))?;
        let end =
            DateTime::parse_from_rfc3339(end).map_err(|e| format!("Invalid --end '{end}': {e}"))?;
        return Ok(TimeWindow::new(
            start.with_timezone(&Utc),
            end.with_timezone(&Utc),
        )?);
    }

    let secs = parse_duration(&args.range)?;
    let lookback = chrono::Duration::from_std(std::time::Duration::from_secs(secs))?;
    Ok(TimeWindow::ending_at(Utc::now(), lookback))
}

/// Parses a duration string like "30m", "12h" or "7d" into seconds.
fn parse_duration(s: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".into());
    }

    // The unit may be any character, so split on a char boundary.
    let idx = s.char_indices().next_back().map_or(0, |(i, _)| i);
    let (num_str, unit) = s.split_at(idx);

    let factor: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 7 * 86400,
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, d, or w.").into()),
    };
    let num: u64 = num_str.parse()?;

    num.checked_mul(factor)
        .ok_or_else(|| format!("Duration '{s}' is too large").into())
}
