//! Observer control and metrics HTTP endpoint
//!
//! Exposes manual check-in/check-out for kiosk hardware, per-marker presence
//! queries, Prometheus metrics and a health probe. Uses hyper for the HTTP
//! server.

use crate::domain::session::{epoch_ms, VisitReport};
use crate::domain::types::{MarkerId, MarkerStatus, PresenceError};
use crate::infra::metrics::{
    Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS,
};
use crate::io::discovery::SharedCollector;
use crate::io::reporting::{Report, ReportSender};
use crate::services::SharedCore;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

pub struct ControlApi {
    pub core: SharedCore,
    pub metrics: Arc<Metrics>,
    pub collector: SharedCollector,
    pub reports: ReportSender,
    pub camera_id: String,
    pub artwork_id: String,
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with camera label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    camera: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{camera=\"{camera}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    camera: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ =
            writeln!(output, "{name}_bucket{{camera=\"{camera}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{camera=\"{camera}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{camera=\"{camera}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{camera=\"{camera}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(
    summary: &MetricsSummary,
    tracked_markers: usize,
    checked_in: usize,
    camera: &str,
) -> String {
    let mut output = String::with_capacity(4096);

    write_metric(
        &mut output,
        "observer_frames_total",
        "Total frames processed",
        MetricType::Counter,
        camera,
        summary.frames_total,
    );
    let _ = writeln!(output, "# HELP observer_frames_per_sec Frames processed per second");
    let _ = writeln!(output, "# TYPE observer_frames_per_sec gauge");
    let _ = writeln!(
        output,
        "observer_frames_per_sec{{camera=\"{camera}\"}} {:.2}",
        summary.frames_per_sec
    );
    write_metric(
        &mut output,
        "observer_frames_received_total",
        "Frames received from the detector (before try_send)",
        MetricType::Counter,
        camera,
        summary.frames_received,
    );
    write_metric(
        &mut output,
        "observer_frames_dropped_total",
        "Frames dropped due to channel full",
        MetricType::Counter,
        camera,
        summary.frames_dropped,
    );
    write_metric(
        &mut output,
        "observer_markers_observed_total",
        "Total marker detections processed",
        MetricType::Counter,
        camera,
        summary.markers_observed,
    );
    write_histogram(
        &mut output,
        "observer_frame_latency_ms",
        "Detector-to-tracker frame latency in milliseconds",
        camera,
        &summary.frame_latency_buckets,
        summary.frame_latency_avg_ms,
    );
    write_metric(
        &mut output,
        "observer_frame_latency_p50_ms",
        "50th percentile frame latency",
        MetricType::Gauge,
        camera,
        summary.frame_latency_p50_ms,
    );
    write_metric(
        &mut output,
        "observer_frame_latency_p95_ms",
        "95th percentile frame latency",
        MetricType::Gauge,
        camera,
        summary.frame_latency_p95_ms,
    );
    write_metric(
        &mut output,
        "observer_frame_latency_p99_ms",
        "99th percentile frame latency",
        MetricType::Gauge,
        camera,
        summary.frame_latency_p99_ms,
    );
    write_metric(
        &mut output,
        "observer_frame_latency_max_ms",
        "Maximum detector-to-tracker frame latency",
        MetricType::Gauge,
        camera,
        summary.frame_latency_max_ms,
    );
    write_metric(
        &mut output,
        "observer_sessions_started_total",
        "Observation sessions started",
        MetricType::Counter,
        camera,
        summary.sessions_started,
    );
    write_metric(
        &mut output,
        "observer_checkins_total",
        "Successful check-ins",
        MetricType::Counter,
        camera,
        summary.checkins,
    );
    write_metric(
        &mut output,
        "observer_checkins_denied_total",
        "Check-ins rejected by the presence state machine",
        MetricType::Counter,
        camera,
        summary.checkins_denied,
    );
    write_metric(
        &mut output,
        "observer_checkouts_total",
        "Successful check-outs",
        MetricType::Counter,
        camera,
        summary.checkouts,
    );
    write_metric(
        &mut output,
        "observer_checkouts_denied_total",
        "Check-outs rejected by the presence state machine",
        MetricType::Counter,
        camera,
        summary.checkouts_denied,
    );
    write_metric(
        &mut output,
        "observer_reports_ok_total",
        "Reports delivered to the collector",
        MetricType::Counter,
        camera,
        summary.reports_ok,
    );
    write_metric(
        &mut output,
        "observer_reports_failed_total",
        "Reports that failed delivery and were dropped",
        MetricType::Counter,
        camera,
        summary.reports_failed,
    );
    write_metric(
        &mut output,
        "observer_reports_dropped_total",
        "Reports dropped due to channel full",
        MetricType::Counter,
        camera,
        summary.reports_dropped,
    );
    write_metric(
        &mut output,
        "observer_tracked_markers",
        "Markers currently tracked by the dwell accumulator",
        MetricType::Gauge,
        camera,
        tracked_markers as u64,
    );
    write_metric(
        &mut output,
        "observer_checked_in_markers",
        "Markers with an open visit session",
        MetricType::Gauge,
        camera,
        checked_in as u64,
    );
    write_metric(
        &mut output,
        "observer_collector_active",
        "Whether the collector is currently active (0/1)",
        MetricType::Gauge,
        camera,
        summary.collector_active,
    );

    output
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn marker_from_path(path: &str, prefix: &str) -> Option<MarkerId> {
    path.strip_prefix(prefix)?.parse::<u32>().ok().map(MarkerId)
}

fn denial_response(err: &PresenceError) -> Response<Full<Bytes>> {
    let body = match err {
        PresenceError::CooldownActive { remaining_ms } => format!(
            r#"{{"success":false,"reason":"{}","remaining_ms":{remaining_ms}}}"#,
            err.reason()
        ),
        _ => format!(r#"{{"success":false,"reason":"{}"}}"#, err.reason()),
    };
    json_response(StatusCode::CONFLICT, body)
}

fn handle_checkin(api: &ControlApi, marker_id: MarkerId) -> Response<Full<Bytes>> {
    let now_ms = epoch_ms();
    let result = api.core.lock().presence.check_in(marker_id, now_ms);
    match result {
        Ok(record) => {
            api.metrics.record_checkin();
            let sid = record.sid.clone();
            api.reports.send(Report::CheckIn(VisitReport {
                camera_id: api.camera_id.clone(),
                artwork_id: api.artwork_id.clone(),
                record,
            }));
            json_response(StatusCode::OK, format!(r#"{{"success":true,"sid":"{sid}"}}"#))
        }
        Err(err) => {
            api.metrics.record_checkin_denied();
            denial_response(&err)
        }
    }
}

fn handle_checkout(api: &ControlApi, marker_id: MarkerId) -> Response<Full<Bytes>> {
    let now_ms = epoch_ms();
    let result = api.core.lock().presence.check_out(marker_id, now_ms);
    match result {
        Ok(record) => {
            api.metrics.record_checkout();
            let sid = record.sid.clone();
            api.reports.send(Report::CheckOut(VisitReport {
                camera_id: api.camera_id.clone(),
                artwork_id: api.artwork_id.clone(),
                record,
            }));
            json_response(StatusCode::OK, format!(r#"{{"success":true,"sid":"{sid}"}}"#))
        }
        Err(err) => {
            api.metrics.record_checkout_denied();
            denial_response(&err)
        }
    }
}

fn handle_presence(api: &ControlApi, marker_id: MarkerId) -> Response<Full<Bytes>> {
    let now_ms = epoch_ms();
    let (status, zone) = {
        let core = api.core.lock();
        (core.presence.status_for(marker_id, now_ms), core.dwell.current_zone(marker_id))
    };
    let body = match status {
        MarkerStatus::Cooldown { remaining_ms } => serde_json::json!({
            "marker_id": marker_id.0,
            "status": status.as_str(),
            "remaining_ms": remaining_ms,
            "zone": zone.map(|z| z.0),
        }),
        _ => serde_json::json!({
            "marker_id": marker_id.0,
            "status": status.as_str(),
            "zone": zone.map(|z| z.0),
        }),
    };
    json_response(StatusCode::OK, body.to_string())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    api: Arc<ControlApi>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    let response = match (method, path.as_str()) {
        (Method::GET, "/metrics") => {
            let (tracked, checked_in) = {
                let core = api.core.lock();
                (core.dwell.tracked(), core.presence.checked_in_count())
            };
            let summary = api.metrics.report();
            let body = format_prometheus_metrics(&summary, tracked, checked_in, &api.camera_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (Method::GET, "/health") => {
            let active = api.collector.read().active;
            json_response(
                StatusCode::OK,
                format!(r#"{{"status":"ok","collector_active":{active}}}"#),
            )
        }
        (Method::GET, p) if p.starts_with("/presence/") => {
            match marker_from_path(p, "/presence/") {
                Some(marker_id) => handle_presence(&api, marker_id),
                None => json_response(
                    StatusCode::BAD_REQUEST,
                    r#"{"success":false,"reason":"invalid_marker_id"}"#.to_string(),
                ),
            }
        }
        (Method::POST, p) if p.starts_with("/checkin/") => {
            match marker_from_path(p, "/checkin/") {
                Some(marker_id) => handle_checkin(&api, marker_id),
                None => json_response(
                    StatusCode::BAD_REQUEST,
                    r#"{"success":false,"reason":"invalid_marker_id"}"#.to_string(),
                ),
            }
        }
        (Method::POST, p) if p.starts_with("/checkout/") => {
            match marker_from_path(p, "/checkout/") {
                Some(marker_id) => handle_checkout(&api, marker_id),
                None => json_response(
                    StatusCode::BAD_REQUEST,
                    r#"{"success":false,"reason":"invalid_marker_id"}"#.to_string(),
                ),
            }
        }
        _ => json_response(
            StatusCode::NOT_FOUND,
            r#"{"success":false,"reason":"not_found"}"#.to_string(),
        ),
    };
    Ok(response)
}

/// Start the observer control HTTP server
pub async fn start_control_server(
    port: u16,
    api: ControlApi,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let api = Arc::new(api);

    info!(port = %port, camera = %api.camera_id, "control_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let api = api.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let api = api.clone();
                                async move { handle_request(req, api).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "control_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "control_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("control_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
