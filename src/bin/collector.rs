//! Exhibit collector - central record sink for exhibit observers
//!
//! Receives session starts, dwell summaries and visit records over HTTP,
//! keeps them for aggregate queries and journals them to disk.

use clap::Parser;
use exhibit_observer::domain::session::epoch_ms;
use exhibit_observer::infra::Config;
use exhibit_observer::io::api::{start_collector_api, CollectorApi};
use exhibit_observer::io::store::RecordStore;
use exhibit_observer::services::aggregation::TimeWindow;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Exhibit collector - observation record sink
#[derive(Parser, Debug)]
#[command(name = "exhibit-collector", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "exhibit-collector starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        bind_port = %config.store_port(),
        journal = %config.store_file(),
        auth = %config.collector_api_key().is_some(),
        "config_loaded"
    );

    let journal = match config.store_file() {
        "" => None,
        path => Some(PathBuf::from(path)),
    };
    let store = Arc::new(RecordStore::new(journal));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Periodic store summary log
    let log_store = store.clone();
    let log_zone_count = config.zone_count();
    let log_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(log_interval));
        loop {
            interval.tick().await;
            let (starts, summaries, visits) = log_store.counts();
            let today = log_store.metrics(TimeWindow::today_utc(epoch_ms()), log_zone_count);
            info!(
                starts = %starts,
                summaries = %summaries,
                visits = %visits,
                today_visitors = %today.distinct_visitors,
                today_avg_dwell_ms = %today.avg_dwell_ms,
                "store_report"
            );
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    let api = CollectorApi {
        store,
        api_key: config.collector_api_key().map(str::to_string),
        advertised_url: config.collector_url().to_string(),
        zone_count: config.zone_count(),
    };
    start_collector_api(config.store_port(), api, shutdown_rx).await?;

    info!("exhibit-collector shutdown complete");
    Ok(())
}
