//! Ratefeed Simulator
//!
//! Runs the exchange rate engine against simulated price feeds.

use std::time::Duration;

use clap::Parser;
use ratefeed_fx::{shared, FxEngineConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod feed;
mod metrics;
mod scenario;

use controller::{build_engine, SimulationController};
use scenario::Scenario;

/// Ratefeed Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Exchange rate engine simulation environment")]
struct Args {
    /// Built-in scenario name or path to a JSON scenario
    #[arg(short, long, default_value = "basic")]
    config: String,

    /// Seconds between exchange rate refreshes
    #[arg(long)]
    interval: Option<f64>,

    /// Seconds to wait for each feed to become ready
    #[arg(long)]
    feed_timeout: Option<f64>,

    /// Seconds between conversion reports
    #[arg(long, default_value = "1.0")]
    report_every: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = infinite)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Emit logs and the final summary as JSON
    #[arg(long)]
    json: bool,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn seconds(value: f64, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| anyhow::anyhow!("Invalid value for --{}: {}", flag, e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json);

    info!("Starting Ratefeed Simulator");

    let mut settings = FxEngineConfig::from_env();
    if let Some(interval) = args.interval {
        settings.update_interval = seconds(interval, "interval")?;
    }
    if let Some(timeout) = args.feed_timeout {
        settings.feed_ready_timeout = seconds(timeout, "feed-timeout")?;
    }
    info!(
        interval_ms = settings.update_interval.as_millis() as u64,
        feed_timeout_ms = settings.feed_ready_timeout.as_millis() as u64,
        "Engine settings"
    );

    let scenario = Scenario::load(&args.config)?;
    let (engine, feeds) = build_engine(&scenario, settings, args.seed)?;
    let engine = shared::install(engine)
        .map_err(|_| anyhow::anyhow!("Shared exchange rate engine already installed"))?;

    let controller = SimulationController::new(scenario, engine, feeds);

    let duration = if args.duration > 0 {
        Some(Duration::from_secs(args.duration))
    } else {
        info!("Press Ctrl+C to stop");
        None
    };
    controller
        .run(seconds(args.report_every, "report-every")?, duration)
        .await?;

    let metrics = controller.get_metrics();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        info!("Simulation complete");
        info!("Reports: {}", metrics.ticks);
        info!("Conversions: {}", metrics.total_conversions);
        info!("Successful: {}", metrics.successful_conversions);
        info!("Unresolvable: {}", metrics.unresolvable);
        info!("Failed: {}", metrics.failed_conversions);
        info!("Success rate: {:.1}%", metrics.success_rate() * 100.0);
        info!("Oldest snapshot seen: {}ms", metrics.max_snapshot_age_ms);
        if let Some(at) = controller.engine().cache().last_refreshed_at() {
            info!("Last refresh: {}", at.to_rfc3339());
        }
    }

    Ok(())
}
