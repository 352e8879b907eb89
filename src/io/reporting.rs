//! Outbound report delivery to the collector
//!
//! All egress funnels through one channel and one periodic reporter task.
//! Delivery is at-most-once: dwell buckets are cleared when a summary is
//! built, and a failed POST is logged and dropped, never retried or queued.

use crate::domain::session::{epoch_ms, ObservationSummary, SessionStart, VisitReport};
use crate::infra::metrics::Metrics;
use crate::io::discovery::SharedCollector;
use crate::services::SharedCore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// One outbound report
#[derive(Debug, Clone)]
pub enum Report {
    Start(SessionStart),
    Summary(ObservationSummary),
    CheckIn(VisitReport),
    CheckOut(VisitReport),
}

impl Report {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Report::Start(_) => "/observation/start",
            Report::Summary(_) => "/observation/update",
            Report::CheckIn(_) => "/checkin",
            Report::CheckOut(_) => "/checkout",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("collector is not active")]
    CollectorInactive,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector returned status {0}")]
    Status(u16),
}

/// Delivery backend for reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, report: &Report) -> Result<(), ReportError>;
}

/// POSTs reports to the discovered collector
pub struct HttpReportSink {
    client: reqwest::Client,
    collector: SharedCollector,
}

impl HttpReportSink {
    pub fn new(request_timeout: Duration, collector: SharedCollector) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { client, collector }
    }
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn deliver(&self, report: &Report) -> Result<(), ReportError> {
        let info = self.collector.read().clone();
        if !info.active {
            return Err(ReportError::CollectorInactive);
        }

        let url = format!("{}{}", info.base_url, report.endpoint());
        let mut request = self.client.post(&url);
        if let Some(key) = &info.api_key {
            request = request.header("X-API-Key", key);
        }
        let request = match report {
            Report::Start(body) => request.json(body),
            Report::Summary(body) => request.json(body),
            Report::CheckIn(body) | Report::CheckOut(body) => request.json(body),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ReportError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Handle for pushing event reports onto the delivery channel
///
/// Non-blocking: a full channel drops the report and bumps a counter.
#[derive(Clone)]
pub struct ReportSender {
    tx: mpsc::Sender<Report>,
    metrics: Arc<Metrics>,
}

impl ReportSender {
    pub fn send(&self, report: Report) {
        if let Err(mpsc::error::TrySendError::Full(report)) = self.tx.try_send(report) {
            self.metrics.record_report_dropped();
            warn!(endpoint = %report.endpoint(), "report_channel_full");
        }
    }
}

pub fn create_report_channel(
    capacity: usize,
    metrics: Arc<Metrics>,
) -> (ReportSender, mpsc::Receiver<Report>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ReportSender { tx, metrics }, rx)
}

/// Periodic summary reporter and event report forwarder
pub struct Reporter<S: ReportSink> {
    core: SharedCore,
    sink: S,
    interval: Duration,
    rx: mpsc::Receiver<Report>,
    metrics: Arc<Metrics>,
    camera_id: String,
    artwork_id: String,
}

impl<S: ReportSink> Reporter<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core: SharedCore,
        sink: S,
        interval: Duration,
        rx: mpsc::Receiver<Report>,
        metrics: Arc<Metrics>,
        camera_id: String,
        artwork_id: String,
    ) -> Self {
        Self { core, sink, interval, rx, metrics, camera_id, artwork_id }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = %self.interval.as_secs(), "reporter_started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the first summary
        // covers a full interval
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_and_report().await;
                }
                maybe_report = self.rx.recv() => {
                    match maybe_report {
                        Some(report) => self.deliver(&report).await,
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        // Final flush so a clean shutdown loses nothing
                        self.flush_and_report().await;
                        info!("reporter_shutdown");
                        break;
                    }
                }
            }
        }
    }

    /// Drain dwell buckets and deliver one summary per marker with time
    pub async fn flush_and_report(&mut self) {
        let flushes = self.core.lock().dwell.flush_all();
        if flushes.is_empty() {
            return;
        }

        let report_ms = epoch_ms();
        for flush in flushes {
            let summary = ObservationSummary {
                camera_id: self.camera_id.clone(),
                artwork_id: self.artwork_id.clone(),
                marker_id: flush.marker_id,
                zone_ms: flush.zone_ms,
                total_ms: flush.total_ms,
                report_ms,
            };
            self.deliver(&Report::Summary(summary)).await;
        }
    }

    async fn deliver(&self, report: &Report) {
        match self.sink.deliver(report).await {
            Ok(()) => {
                self.metrics.record_report_ok();
                debug!(endpoint = %report.endpoint(), "report_delivered");
            }
            Err(err) => {
                self.metrics.record_report_failed();
                warn!(endpoint = %report.endpoint(), error = %err, "report_dropped");
            }
        }
    }
}
