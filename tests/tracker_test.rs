//! Integration tests for the frame-to-report pipeline

use async_trait::async_trait;
use exhibit_observer::domain::types::{FrameObservation, MarkerDetection, MarkerId};
use exhibit_observer::infra::{Config, Metrics};
use exhibit_observer::io::reporting::{
    create_report_channel, Report, ReportError, ReportSink, Reporter,
};
use exhibit_observer::services::{new_shared_core, SharedCore, Tracker};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

fn frame(frame_ms: u64, markers: &[(u32, f64)]) -> FrameObservation {
    FrameObservation {
        frame_ms,
        width: 900,
        height: 600,
        markers: markers
            .iter()
            .map(|&(id, x)| MarkerDetection { marker_id: MarkerId(id), position: [x, 300.0] })
            .collect(),
    }
}

struct CapturingSink {
    delivered: Arc<Mutex<Vec<Report>>>,
}

#[async_trait]
impl ReportSink for CapturingSink {
    async fn deliver(&self, report: &Report) -> Result<(), ReportError> {
        self.delivered.lock().push(report.clone());
        Ok(())
    }
}

struct TestPipeline {
    core: SharedCore,
    frame_tx: mpsc::Sender<FrameObservation>,
    tracker_task: tokio::task::JoinHandle<()>,
    report_rx: mpsc::Receiver<Report>,
}

fn start_pipeline() -> TestPipeline {
    let config = Config::default();
    let metrics = Arc::new(Metrics::new());
    let core = new_shared_core(config.zone_count(), config.cooldown_ms());
    let (report_tx, report_rx) = create_report_channel(64, metrics.clone());
    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let tracker = Tracker::new(&config, core.clone(), report_tx, metrics);
    let tracker_task = tokio::spawn(tracker.run(frame_rx, shutdown_rx));

    TestPipeline { core, frame_tx, tracker_task, report_rx }
}

#[tokio::test]
async fn test_frames_drive_dwell_and_checkin() {
    let mut pipeline = start_pipeline();

    // Marker 42 walks left band -> center band and stays there
    pipeline.frame_tx.send(frame(1000, &[(42, 100.0)])).await.unwrap();
    pipeline.frame_tx.send(frame(4000, &[(42, 120.0)])).await.unwrap();
    pipeline.frame_tx.send(frame(5000, &[(42, 450.0)])).await.unwrap();
    pipeline.frame_tx.send(frame(9000, &[(42, 460.0)])).await.unwrap();

    // Closing the channel drains the loop
    drop(pipeline.frame_tx);
    pipeline.tracker_task.await.unwrap();

    let mut starts = 0;
    let mut checkins = 0;
    while let Ok(report) = pipeline.report_rx.try_recv() {
        match report {
            Report::Start(start) => {
                assert_eq!(start.marker_id, MarkerId(42));
                starts += 1;
            }
            Report::CheckIn(visit) => {
                assert_eq!(visit.record.marker_id, MarkerId(42));
                checkins += 1;
            }
            other => panic!("unexpected report {other:?}"),
        }
    }
    assert_eq!(starts, 1);
    assert_eq!(checkins, 1);

    let mut core = pipeline.core.lock();
    assert_eq!(core.presence.checked_in_count(), 1);
    // 3s in the left band plus 4s in the center band
    let flush = core.dwell.flush(MarkerId(42)).unwrap();
    assert_eq!(flush.zone_ms, vec![3000, 4000, 0]);
    assert_eq!(flush.total_ms, 7000);
}

#[tokio::test]
async fn test_multiple_markers_tracked_independently() {
    let mut pipeline = start_pipeline();

    pipeline.frame_tx.send(frame(1000, &[(1, 100.0), (2, 800.0)])).await.unwrap();
    pipeline.frame_tx.send(frame(3000, &[(1, 110.0), (2, 810.0)])).await.unwrap();

    drop(pipeline.frame_tx);
    pipeline.tracker_task.await.unwrap();

    let mut started = Vec::new();
    while let Ok(report) = pipeline.report_rx.try_recv() {
        if let Report::Start(start) = report {
            started.push(start.marker_id);
        }
    }
    started.sort_by_key(|m| m.0);
    assert_eq!(started, vec![MarkerId(1), MarkerId(2)]);

    let mut core = pipeline.core.lock();
    assert_eq!(core.dwell.flush(MarkerId(1)).unwrap().zone_ms, vec![2000, 0, 0]);
    assert_eq!(core.dwell.flush(MarkerId(2)).unwrap().zone_ms, vec![0, 0, 2000]);
}

#[tokio::test]
async fn test_reporter_delivers_flushed_summaries() {
    let config = Config::default();
    let metrics = Arc::new(Metrics::new());
    let core = new_shared_core(config.zone_count(), config.cooldown_ms());
    let (report_tx, report_rx) = create_report_channel(64, metrics.clone());
    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let tracker = Tracker::new(&config, core.clone(), report_tx, metrics.clone());
    let tracker_task = tokio::spawn(tracker.run(frame_rx, shutdown_rx));

    frame_tx.send(frame(1000, &[(7, 100.0)])).await.unwrap();
    frame_tx.send(frame(6000, &[(7, 110.0)])).await.unwrap();
    drop(frame_tx);
    tracker_task.await.unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = CapturingSink { delivered: delivered.clone() };
    let mut reporter = Reporter::new(
        core,
        sink,
        Duration::from_secs(30),
        report_rx,
        metrics,
        config.camera_id().to_string(),
        config.artwork_id().to_string(),
    );
    reporter.flush_and_report().await;

    let reports = delivered.lock();
    let summary = reports
        .iter()
        .find_map(|r| match r {
            Report::Summary(s) => Some(s.clone()),
            _ => None,
        })
        .expect("summary should be delivered");
    assert_eq!(summary.marker_id, MarkerId(7));
    assert_eq!(summary.total_ms, 5000);
    assert_eq!(summary.camera_id, "pi_001");
    assert_eq!(summary.artwork_id, "artwork_001");
}
