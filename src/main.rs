//! Exhibit observer - presence and dwell tracking for a single camera
//!
//! Consumes marker detections from the camera process, tracks per-zone dwell
//! time and visit check-ins, and reports to the exhibit collector.
//!
//! Module structure:
//! - `domain/` - Core business types (markers, zones, visit sessions)
//! - `io/` - External interfaces (detector ingest, collector egress, HTTP)
//! - `services/` - Business logic (zoning, dwell, presence, tracker)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use exhibit_observer::infra::{Config, Metrics};
use exhibit_observer::io::control::{start_control_server, ControlApi};
use exhibit_observer::io::detection::{start_detection_listener, DetectionListenerConfig};
use exhibit_observer::io::discovery::{new_shared_collector, CollectorDiscovery};
use exhibit_observer::io::reporting::{create_report_channel, HttpReportSink, Reporter};
use exhibit_observer::services::{new_shared_core, Tracker};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Exhibit observer - camera-side presence tracking
#[derive(Parser, Debug)]
#[command(name = "exhibit-observer", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "exhibit-observer starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        camera_id = %config.camera_id(),
        artwork_id = %config.artwork_id(),
        zone_count = %config.zone_count(),
        eligible_zone = %config.eligible_zone(),
        cooldown_ms = %config.cooldown_ms(),
        auto_checkin = %config.auto_checkin(),
        collector_url = %config.collector_url(),
        detection_port = %config.detection_port(),
        control_port = %config.control_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let core = new_shared_core(config.zone_count(), config.cooldown_ms());
    let collector = new_shared_collector(
        config.collector_url().to_string(),
        config.collector_api_key().map(str::to_string),
        // Without discovery the configured collector is always active
        config.discovery_url().is_none(),
    );
    metrics.set_collector_active(config.discovery_url().is_none());

    // Create frame and report channels (bounded for backpressure)
    let (frame_tx, frame_rx) = mpsc::channel(1000);
    let (report_tx, report_rx) = create_report_channel(1000, metrics.clone());

    // Start detection listener
    let detection_config = DetectionListenerConfig {
        port: config.detection_port(),
        enabled: config.detection_enabled(),
    };
    let detection_metrics = metrics.clone();
    let detection_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            start_detection_listener(detection_config, frame_tx, detection_metrics, detection_shutdown)
                .await
        {
            tracing::error!(error = %e, "Detection listener error");
        }
    });

    // Start collector discovery (if configured)
    if let Some(discovery_url) = config.discovery_url() {
        let discovery = CollectorDiscovery::new(
            discovery_url.to_string(),
            config.camera_id().to_string(),
            config.discovery_interval(),
            config.request_timeout(),
            collector.clone(),
            metrics.clone(),
        );
        let discovery_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            discovery.run(discovery_shutdown).await;
        });
    }

    // Start control HTTP server
    let control_api = ControlApi {
        core: core.clone(),
        metrics: metrics.clone(),
        collector: collector.clone(),
        reports: report_tx.clone(),
        camera_id: config.camera_id().to_string(),
        artwork_id: config.artwork_id().to_string(),
    };
    let control_port = config.control_port();
    let control_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_control_server(control_port, control_api, control_shutdown).await {
            tracing::error!(error = %e, "Control server error");
        }
    });

    // Start periodic reporter
    let sink = HttpReportSink::new(config.request_timeout(), collector);
    let reporter = Reporter::new(
        core.clone(),
        sink,
        config.summary_interval(),
        report_rx,
        metrics.clone(),
        config.camera_id().to_string(),
        config.artwork_id().to_string(),
    );
    let reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        reporter.run(reporter_shutdown).await;
    });

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run tracker - consumes frames until shutdown
    let tracker = Tracker::new(&config, core, report_tx, metrics);
    tracker.run(frame_rx, shutdown_rx).await;

    info!("exhibit-observer shutdown complete");
    Ok(())
}
