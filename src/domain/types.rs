//! Shared types for the exhibit observer

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Newtype wrapper for fiducial marker IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MarkerId(pub u32);

impl std::fmt::Display for MarkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 1-based index of a vertical band within the camera frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ZoneIndex(pub u8);

impl ZoneIndex {
    /// 0-based position into a per-zone bucket vector
    #[inline]
    pub fn bucket(self) -> usize {
        (self.0 as usize).saturating_sub(1)
    }
}

impl std::fmt::Display for ZoneIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One detected marker within a frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerDetection {
    pub marker_id: MarkerId,
    /// Pixel position of the marker center, [x, y]
    pub position: [f64; 2],
}

/// All marker detections for a single camera frame
///
/// Produced by the external detection stage; the core never sees pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameObservation {
    /// Frame timestamp (epoch ms)
    pub frame_ms: u64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    #[serde(default)]
    pub markers: Vec<MarkerDetection>,
}

/// Presence status of a marker as seen by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStatus {
    /// No open session and no unexpired cooldown
    CanCheckIn,
    /// An open session exists
    CheckedIn,
    /// Checked out less than the cooldown period ago
    Cooldown { remaining_ms: u64 },
}

impl MarkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerStatus::CanCheckIn => "can_check_in",
            MarkerStatus::CheckedIn => "checked_in",
            MarkerStatus::Cooldown { .. } => "cooldown",
        }
    }
}

/// Structured outcomes of presence transitions
///
/// These are returned to the request surface, never raised as fatal errors;
/// the caller decides user-visible messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PresenceError {
    #[error("marker already checked in")]
    AlreadyCheckedIn,
    #[error("cooldown active for another {remaining_ms}ms")]
    CooldownActive { remaining_ms: u64 },
    #[error("no active session for marker")]
    NoActiveSession,
}

impl PresenceError {
    /// Short machine-readable reason for API responses
    pub fn reason(&self) -> &'static str {
        match self {
            PresenceError::AlreadyCheckedIn => "already_checked_in",
            PresenceError::CooldownActive { .. } => "cooldown_active",
            PresenceError::NoActiveSession => "no_active_session",
        }
    }
}
