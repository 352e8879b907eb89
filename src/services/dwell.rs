//! Per-marker time-in-zone bookkeeping
//!
//! Tracks, for each active marker, how long it has stayed within each zone.
//! Time accrues only while a marker is observed in the same zone as its
//! previous observation; the instant of a zone transition contributes nothing
//! to either bucket. Buckets are cleared on flush but the marker stays
//! tracked, so dwell accumulation continues across reporting intervals.

use crate::domain::types::{MarkerId, ZoneIndex};
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};
use tracing::debug;

/// Per-marker dwell state
#[derive(Debug)]
struct DwellState {
    /// Elapsed ms per zone, indexed by `ZoneIndex - 1`
    zone_ms: SmallVec<[u64; 4]>,
    last_seen_ms: u64,
    current_zone: ZoneIndex,
}

/// Buckets drained from one marker by a flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DwellFlush {
    pub marker_id: MarkerId,
    /// Elapsed ms per zone, indexed by `ZoneIndex - 1`
    pub zone_ms: Vec<u64>,
    pub total_ms: u64,
}

/// Accumulates per-zone dwell time for every tracked marker
///
/// Sole owner of all `DwellState` entries; callers serialize access through
/// the shared core mutex.
pub struct DwellAccumulator {
    zone_count: u8,
    states: FxHashMap<MarkerId, DwellState>,
}

impl DwellAccumulator {
    pub fn new(zone_count: u8) -> Self {
        Self { zone_count, states: FxHashMap::default() }
    }

    /// Record one classified observation of a marker
    ///
    /// Returns `true` when this is the first observation of the marker
    /// (a session start the caller should report).
    pub fn observe(&mut self, marker_id: MarkerId, zone: ZoneIndex, at_ms: u64) -> bool {
        match self.states.get_mut(&marker_id) {
            None => {
                self.states.insert(
                    marker_id,
                    DwellState {
                        zone_ms: smallvec![0; self.zone_count as usize],
                        last_seen_ms: at_ms,
                        current_zone: zone,
                    },
                );
                debug!(marker_id = %marker_id, zone = %zone, "dwell_session_started");
                true
            }
            Some(state) => {
                if zone == state.current_zone {
                    // saturating_sub discards negative deltas (clock skew or
                    // out-of-order frames); buckets stay non-negative
                    let delta = at_ms.saturating_sub(state.last_seen_ms);
                    state.zone_ms[zone.bucket()] += delta;
                }
                state.current_zone = zone;
                state.last_seen_ms = at_ms;
                false
            }
        }
    }

    /// Drain one marker's buckets if any time has accrued
    ///
    /// Returns `None` for unknown markers and for markers with zero total
    /// elapsed time (no-op visits are never reported). The marker stays
    /// tracked either way.
    pub fn flush(&mut self, marker_id: MarkerId) -> Option<DwellFlush> {
        let state = self.states.get_mut(&marker_id)?;
        let total_ms: u64 = state.zone_ms.iter().sum();
        if total_ms == 0 {
            return None;
        }

        let zone_ms = state.zone_ms.to_vec();
        state.zone_ms.iter_mut().for_each(|b| *b = 0);

        Some(DwellFlush { marker_id, zone_ms, total_ms })
    }

    /// Drain every tracked marker with accrued time
    pub fn flush_all(&mut self) -> Vec<DwellFlush> {
        let markers: Vec<MarkerId> = self.states.keys().copied().collect();
        markers.into_iter().filter_map(|m| self.flush(m)).collect()
    }

    /// Current zone of a tracked marker
    pub fn current_zone(&self, marker_id: MarkerId) -> Option<ZoneIndex> {
        self.states.get(&marker_id).map(|s| s.current_zone)
    }

    /// Number of markers currently tracked
    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}
