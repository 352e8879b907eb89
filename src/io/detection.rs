//! Frame observation listener
//!
//! Accepts TCP connections from the marker detection process and reads one
//! JSON frame observation per line. Malformed lines are skipped; a full frame
//! channel drops the frame rather than applying backpressure to the detector.

use crate::domain::types::FrameObservation;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct DetectionListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

pub async fn start_detection_listener(
    config: DetectionListenerConfig,
    frame_tx: mpsc::Sender<FrameObservation>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if !config.enabled {
        info!("detection_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "detection_listener_started");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!(peer = %peer, "detector_connected");
                        let tx = frame_tx.clone();
                        let metrics = metrics.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, tx, metrics, shutdown).await;
                            info!(peer = %peer, "detector_disconnected");
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "detection_accept_failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("detection_listener_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    frame_tx: mpsc::Sender<FrameObservation>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(stream).lines();
    let mut last_drop_warn: Option<Instant> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => return,
                    Err(err) => {
                        debug!(error = %err, "detection_read_failed");
                        return;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let frame: FrameObservation = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(error = %err, "frame_parse_failed");
                        continue;
                    }
                };

                metrics.record_frame_received();
                match frame_tx.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        metrics.record_frame_dropped();
                        let warn_due = last_drop_warn
                            .map_or(true, |t| t.elapsed() >= Duration::from_secs(1));
                        if warn_due {
                            warn!("frame_channel_full");
                            last_drop_warn = Some(Instant::now());
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frames_flow_from_socket_to_channel() {
        let metrics = Arc::new(Metrics::new());
        let (frame_tx, mut frame_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler_metrics = metrics.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, frame_tx, handler_metrics, shutdown_rx).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"{\"frame_ms\":1000,\"width\":900,\"height\":600,\
                \"markers\":[{\"marker_id\":42,\"position\":[120.5,300.0]}]}\n\
                not json\n\
                {\"frame_ms\":2000,\"width\":900,\"height\":600,\"markers\":[]}\n",
            )
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let first = frame_rx.recv().await.unwrap();
        assert_eq!(first.frame_ms, 1000);
        assert_eq!(first.markers.len(), 1);

        // The malformed line was skipped
        let second = frame_rx.recv().await.unwrap();
        assert_eq!(second.frame_ms, 2000);
        assert!(second.markers.is_empty());

        assert_eq!(metrics.report().frames_received, 2);
    }

    #[tokio::test]
    async fn test_full_channel_drops_frames() {
        let metrics = Arc::new(Metrics::new());
        let (frame_tx, _frame_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler_metrics = metrics.clone();
        let handler = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handle_connection(stream, frame_tx, handler_metrics, shutdown_rx).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        for frame_ms in 0..3u64 {
            let line = format!(
                "{{\"frame_ms\":{frame_ms},\"width\":900,\"height\":600,\"markers\":[]}}\n"
            );
            client.write_all(line.as_bytes()).await.unwrap();
        }
        client.shutdown().await.unwrap();
        handler.await.unwrap();

        let summary = metrics.report();
        assert_eq!(summary.frames_received, 3);
        assert_eq!(summary.frames_dropped, 2);
    }
}
