//! Collector ingest and query HTTP API
//!
//! Receives session starts, dwell summaries and visit records from observers
//! and answers aggregate metric queries. Write endpoints require the API key
//! when one is configured; reads are open.

use crate::domain::session::{epoch_ms, CheckInRecord, ObservationSummary, SessionStart};
use crate::io::store::RecordStore;
use crate::services::aggregation::TimeWindow;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct CollectorApi {
    pub store: Arc<RecordStore>,
    pub api_key: Option<String>,
    pub advertised_url: String,
    pub zone_count: u8,
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn ok_json(body: String) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

fn error_json(status: StatusCode, reason: &str) -> Response<Full<Bytes>> {
    json_response(status, format!(r#"{{"success":false,"reason":"{reason}"}}"#))
}

fn authorized(api_key: &Option<String>, req: &Request<hyper::body::Incoming>) -> bool {
    let Some(expected) = api_key else {
        return true;
    };
    req.headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(|got| got == expected)
        .unwrap_or(false)
}

async fn read_json<T: DeserializeOwned>(
    req: Request<hyper::body::Incoming>,
) -> Result<T, Response<Full<Bytes>>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(error = %err, "ingest_body_read_failed");
            return Err(error_json(StatusCode::BAD_REQUEST, "body_read_failed"));
        }
    };
    serde_json::from_slice(&body).map_err(|err| {
        warn!(error = %err, "ingest_body_parse_failed");
        error_json(StatusCode::BAD_REQUEST, "invalid_json")
    })
}

fn parse_window(query: Option<&str>) -> TimeWindow {
    let wants_today = query
        .unwrap_or("")
        .split('&')
        .any(|pair| pair == "window=today");
    if wants_today {
        TimeWindow::today_utc(epoch_ms())
    } else {
        TimeWindow::all()
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    api: Arc<CollectorApi>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method == Method::POST && !authorized(&api.api_key, &req) {
        warn!(path = %path, "ingest_unauthorized");
        return Ok(error_json(StatusCode::UNAUTHORIZED, "invalid_api_key"));
    }

    let response = match (method, path.as_str()) {
        (Method::POST, "/observation/start") => match read_json::<SessionStart>(req).await {
            Ok(start) => {
                info!(
                    camera_id = %start.camera_id,
                    marker_id = %start.marker_id,
                    "session_start_received"
                );
                api.store.record_start(start);
                ok_json(r#"{"success":true}"#.to_string())
            }
            Err(response) => response,
        },
        (Method::POST, "/observation/update") => {
            match read_json::<ObservationSummary>(req).await {
                Ok(summary) => {
                    api.store.append_summary(summary);
                    ok_json(r#"{"success":true}"#.to_string())
                }
                Err(response) => response,
            }
        }
        (Method::POST, "/checkin") => match read_json::<VisitReportBody>(req).await {
            Ok(body) => {
                api.store.record_checkin(body.record);
                ok_json(r#"{"success":true}"#.to_string())
            }
            Err(response) => response,
        },
        (Method::POST, "/checkout") => match read_json::<VisitReportBody>(req).await {
            Ok(body) => {
                api.store.apply_checkout(body.record);
                ok_json(r#"{"success":true}"#.to_string())
            }
            Err(response) => response,
        },
        (Method::GET, "/status") => {
            let status = serde_json::json!({
                "status": "active",
                "server_url": api.advertised_url,
                "api_key": api.api_key,
            });
            ok_json(status.to_string())
        }
        (Method::GET, "/metrics/summary") => {
            let window = parse_window(req.uri().query());
            let metrics = api.store.metrics(window, api.zone_count);
            match serde_json::to_string(&metrics) {
                Ok(body) => ok_json(body),
                Err(err) => {
                    error!(error = %err, "metrics_serialize_failed");
                    error_json(StatusCode::INTERNAL_SERVER_ERROR, "serialize_failed")
                }
            }
        }
        (Method::GET, "/health") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail"),
        _ => error_json(StatusCode::NOT_FOUND, "not_found"),
    };
    Ok(response)
}

/// Visit report body as sent by observers
#[derive(serde::Deserialize)]
struct VisitReportBody {
    #[allow(dead_code)]
    camera_id: String,
    #[allow(dead_code)]
    artwork_id: String,
    record: CheckInRecord,
}

/// Start the collector HTTP server
pub async fn start_collector_api(
    port: u16,
    api: CollectorApi,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let api = Arc::new(api);

    info!(port = %port, auth = %api.api_key.is_some(), "collector_api_started");

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
                                error!(error = %e, "collector_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "collector_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("collector_api_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
