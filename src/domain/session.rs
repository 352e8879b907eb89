//! Visit session and observation summary data models

use crate::domain::types::MarkerId;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Visit session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    CheckedIn,
    CheckedOut,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::CheckedIn => "checked_in",
            VisitStatus::CheckedOut => "checked_out",
        }
    }
}

/// One visit session for a marker, from check-in to check-out
///
/// Created by the presence state machine on check-in; closed exactly once on
/// check-out and immutable thereafter. The next visit gets a fresh record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInRecord {
    /// UUIDv7 session ID
    pub sid: String,
    pub marker_id: MarkerId,
    /// Check-in time (epoch ms)
    pub check_in_ms: u64,
    /// Check-out time (epoch ms), unset while the session is open
    pub check_out_ms: Option<u64>,
    pub status: VisitStatus,
}

impl CheckInRecord {
    pub fn new(marker_id: MarkerId, check_in_ms: u64) -> Self {
        Self {
            sid: new_uuid_v7(),
            marker_id,
            check_in_ms,
            check_out_ms: None,
            status: VisitStatus::CheckedIn,
        }
    }

    /// Close the session
    pub fn check_out(&mut self, at_ms: u64) {
        self.check_out_ms = Some(at_ms);
        self.status = VisitStatus::CheckedOut;
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == VisitStatus::CheckedIn
    }
}

/// Session-start event, reported when a marker is first observed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStart {
    pub camera_id: String,
    pub artwork_id: String,
    pub marker_id: MarkerId,
    /// Frame time of the first observation (epoch ms)
    pub at_ms: u64,
}

/// Accumulated per-zone dwell for one marker over one reporting interval
///
/// Write-once on the collector side; the observer clears its buckets as soon
/// as the summary is built, so a failed delivery loses this interval only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationSummary {
    pub camera_id: String,
    pub artwork_id: String,
    pub marker_id: MarkerId,
    /// Elapsed ms per zone, indexed by `ZoneIndex - 1`
    pub zone_ms: Vec<u64>,
    /// Sum of `zone_ms`
    pub total_ms: u64,
    /// When the summary was built (epoch ms)
    pub report_ms: u64,
}

/// Check-in/check-out event as delivered to the collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitReport {
    pub camera_id: String,
    pub artwork_id: String,
    pub record: CheckInRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_open() {
        let record = CheckInRecord::new(MarkerId(42), 1000);
        assert!(!record.sid.is_empty());
        assert_eq!(record.marker_id, MarkerId(42));
        assert_eq!(record.check_in_ms, 1000);
        assert!(record.check_out_ms.is_none());
        assert!(record.is_open());
    }

    #[test]
    fn test_check_out_closes_record() {
        let mut record = CheckInRecord::new(MarkerId(42), 1000);
        record.check_out(2500);

        assert_eq!(record.check_out_ms, Some(2500));
        assert_eq!(record.status, VisitStatus::CheckedOut);
        assert!(!record.is_open());
    }

    #[test]
    fn test_record_json_round_trip() {
        let mut record = CheckInRecord::new(MarkerId(7), 1736012345678);
        record.check_out(1736012399999);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"checked_out\""));

        let parsed: CheckInRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sid, record.sid);
        assert_eq!(parsed.marker_id, MarkerId(7));
        assert_eq!(parsed.check_out_ms, Some(1736012399999));
    }

    #[test]
    fn test_summary_json_shape() {
        let summary = ObservationSummary {
            camera_id: "pi_001".to_string(),
            artwork_id: "artwork_001".to_string(),
            marker_id: MarkerId(42),
            zone_ms: vec![5000, 0, 0],
            total_ms: 5000,
            report_ms: 1736012345678,
        };

        let parsed: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&summary).unwrap()).unwrap();
        assert_eq!(parsed["camera_id"], "pi_001");
        assert_eq!(parsed["marker_id"], 42);
        assert_eq!(parsed["zone_ms"], serde_json::json!([5000, 0, 0]));
        assert_eq!(parsed["total_ms"], 5000);
    }

    #[test]
    fn test_uuid_v7_generation() {
        let a = new_uuid_v7();
        let b = new_uuid_v7();
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);
    }
}
