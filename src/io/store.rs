//! Collector-side record store
//!
//! Keeps every received summary and visit record in memory for aggregate
//! queries and appends each one as a tagged JSON line to an optional journal
//! file. Journal write failures are logged and do not fail ingestion.

use crate::domain::session::{CheckInRecord, ObservationSummary, SessionStart};
use crate::services::aggregation::{self, AggregateMetrics, TimeWindow};
use parking_lot::RwLock;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Default)]
struct StoreInner {
    starts: Vec<SessionStart>,
    summaries: Vec<ObservationSummary>,
    visits: Vec<CheckInRecord>,
}

pub struct RecordStore {
    inner: RwLock<StoreInner>,
    journal_path: Option<PathBuf>,
}

impl RecordStore {
    pub fn new(journal_path: Option<PathBuf>) -> Self {
        Self { inner: RwLock::new(StoreInner::default()), journal_path }
    }

    pub fn record_start(&self, start: SessionStart) {
        self.journal("start", &start);
        self.inner.write().starts.push(start);
    }

    pub fn append_summary(&self, summary: ObservationSummary) {
        self.journal("summary", &summary);
        debug!(
            marker_id = %summary.marker_id,
            total_ms = %summary.total_ms,
            "summary_stored"
        );
        self.inner.write().summaries.push(summary);
    }

    pub fn record_checkin(&self, record: CheckInRecord) {
        self.journal("checkin", &record);
        self.inner.write().visits.push(record);
    }

    /// Replace the matching open record, or store the closed record as-is
    /// when its check-in was never received
    pub fn apply_checkout(&self, record: CheckInRecord) {
        self.journal("checkout", &record);
        let mut inner = self.inner.write();
        match inner.visits.iter_mut().find(|v| v.sid == record.sid) {
            Some(existing) => *existing = record,
            None => inner.visits.push(record),
        }
    }

    /// Aggregate metrics over the given window
    pub fn metrics(&self, window: TimeWindow, zone_count: u8) -> AggregateMetrics {
        let inner = self.inner.read();
        aggregation::compute(&inner.summaries, &inner.visits, window, zone_count)
    }

    /// (session starts, summaries, visits) stored so far
    pub fn counts(&self) -> (usize, usize, usize) {
        let inner = self.inner.read();
        (inner.starts.len(), inner.summaries.len(), inner.visits.len())
    }

    fn journal<T: Serialize>(&self, kind: &str, payload: &T) {
        let Some(path) = &self.journal_path else {
            return;
        };
        if let Err(err) = append_line(path, kind, payload) {
            warn!(path = %path.display(), error = %err, "journal_write_failed");
        }
    }
}

fn append_line<T: Serialize>(path: &Path, kind: &str, payload: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut line = serde_json::to_value(payload)?;
    if let Some(object) = line.as_object_mut() {
        object.insert("kind".to_string(), serde_json::Value::String(kind.to_string()));
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::MarkerId;

    fn summary(marker: u32, report_ms: u64) -> ObservationSummary {
        ObservationSummary {
            camera_id: "pi_001".to_string(),
            artwork_id: "artwork_001".to_string(),
            marker_id: MarkerId(marker),
            zone_ms: vec![4000, 0, 0],
            total_ms: 4000,
            report_ms,
        }
    }

    #[test]
    fn test_store_and_aggregate() {
        let store = RecordStore::new(None);

        store.append_summary(summary(1, 100));
        store.append_summary(summary(2, 200));
        store.record_checkin(CheckInRecord::new(MarkerId(1), 150));

        let metrics = store.metrics(TimeWindow::all(), 3);
        assert_eq!(metrics.distinct_visitors, 2);
        assert_eq!(metrics.avg_dwell_ms, 4000);
        assert_eq!(metrics.visit_count, 1);
        assert_eq!(store.counts(), (0, 2, 1));
    }

    #[test]
    fn test_checkout_replaces_open_record() {
        let store = RecordStore::new(None);

        let mut record = CheckInRecord::new(MarkerId(7), 1000);
        store.record_checkin(record.clone());
        record.check_out(5000);
        store.apply_checkout(record.clone());

        let (_, _, visits) = store.counts();
        assert_eq!(visits, 1);

        // Checkout with an unknown sid is stored rather than dropped
        let mut orphan = CheckInRecord::new(MarkerId(8), 2000);
        orphan.check_out(3000);
        store.apply_checkout(orphan);
        assert_eq!(store.counts().2, 2);
    }

    #[test]
    fn test_journal_lines_are_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let store = RecordStore::new(Some(path.clone()));

        store.append_summary(summary(1, 100));
        store.record_checkin(CheckInRecord::new(MarkerId(1), 150));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "summary");
        assert_eq!(first["marker_id"], 1);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["kind"], "checkin");
    }

    #[test]
    fn test_journal_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/records.jsonl");
        let store = RecordStore::new(Some(path.clone()));

        store.record_start(SessionStart {
            camera_id: "pi_001".to_string(),
            artwork_id: "artwork_001".to_string(),
            marker_id: MarkerId(1),
            at_ms: 0,
        });

        assert!(path.exists());
    }
}
