//! Check-in/check-out lifecycle with cooldown enforcement
//!
//! Each marker moves through absent → checked_in → cooldown → absent. The
//! cooldown is anchored at checkout time; once it elapses, eligibility is a
//! pure query-time computation with no stored transition. At most one open
//! record can exist per marker because the machine keeps a single latest
//! record per marker and refuses check-in while it is open.

use crate::domain::session::CheckInRecord;
use crate::domain::types::{MarkerId, MarkerStatus, PresenceError};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// Default minimum interval between checkout and the next check-in
pub const DEFAULT_COOLDOWN_MS: u64 = 10_000;

/// Per-marker presence state machine
///
/// Sole owner of the "currently checked in" set. With `cooldown_ms = 0` the
/// machine degenerates to the explicit-checkout-only variant: a new check-in
/// is allowed immediately after checkout.
pub struct PresenceStateMachine {
    cooldown_ms: u64,
    /// Latest visit record per marker, open or most recently closed
    visits: FxHashMap<MarkerId, CheckInRecord>,
}

impl PresenceStateMachine {
    pub fn new(cooldown_ms: u64) -> Self {
        Self { cooldown_ms, visits: FxHashMap::default() }
    }

    /// Presence status of a marker at the given time
    pub fn status_for(&self, marker_id: MarkerId, now_ms: u64) -> MarkerStatus {
        match self.visits.get(&marker_id) {
            None => MarkerStatus::CanCheckIn,
            Some(record) if record.is_open() => MarkerStatus::CheckedIn,
            Some(record) => {
                let checked_out_ms = record.check_out_ms.unwrap_or(record.check_in_ms);
                let elapsed = now_ms.saturating_sub(checked_out_ms);
                if elapsed < self.cooldown_ms {
                    MarkerStatus::Cooldown { remaining_ms: self.cooldown_ms - elapsed }
                } else {
                    MarkerStatus::CanCheckIn
                }
            }
        }
    }

    /// Open a new visit session for a marker
    ///
    /// Rejects duplicate check-ins and check-ins during an unexpired
    /// cooldown; the previous closed record is replaced on success.
    pub fn check_in(
        &mut self,
        marker_id: MarkerId,
        now_ms: u64,
    ) -> Result<CheckInRecord, PresenceError> {
        match self.status_for(marker_id, now_ms) {
            MarkerStatus::CheckedIn => {
                debug!(marker_id = %marker_id, "checkin_rejected_already_checked_in");
                Err(PresenceError::AlreadyCheckedIn)
            }
            MarkerStatus::Cooldown { remaining_ms } => {
                debug!(
                    marker_id = %marker_id,
                    remaining_ms = %remaining_ms,
                    "checkin_rejected_cooldown"
                );
                Err(PresenceError::CooldownActive { remaining_ms })
            }
            MarkerStatus::CanCheckIn => {
                let record = CheckInRecord::new(marker_id, now_ms);
                info!(
                    marker_id = %marker_id,
                    sid = %record.sid,
                    check_in_ms = %now_ms,
                    "marker_checked_in"
                );
                self.visits.insert(marker_id, record.clone());
                Ok(record)
            }
        }
    }

    /// Close the open visit session for a marker
    pub fn check_out(
        &mut self,
        marker_id: MarkerId,
        now_ms: u64,
    ) -> Result<CheckInRecord, PresenceError> {
        match self.visits.get_mut(&marker_id) {
            Some(record) if record.is_open() => {
                record.check_out(now_ms);
                info!(
                    marker_id = %marker_id,
                    sid = %record.sid,
                    check_out_ms = %now_ms,
                    "marker_checked_out"
                );
                Ok(record.clone())
            }
            _ => {
                debug!(marker_id = %marker_id, "checkout_rejected_no_active_session");
                Err(PresenceError::NoActiveSession)
            }
        }
    }

    /// Number of currently open sessions
    pub fn checked_in_count(&self) -> usize {
        self.visits.values().filter(|r| r.is_open()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> PresenceStateMachine {
        PresenceStateMachine::new(DEFAULT_COOLDOWN_MS)
    }

    #[test]
    fn test_first_checkin_succeeds() {
        let mut presence = machine();

        let record = presence.check_in(MarkerId(42), 0).unwrap();

        assert_eq!(record.marker_id, MarkerId(42));
        assert!(record.is_open());
        assert_eq!(presence.status_for(MarkerId(42), 1), MarkerStatus::CheckedIn);
        assert_eq!(presence.checked_in_count(), 1);
    }

    #[test]
    fn test_double_checkin_rejected() {
        let mut presence = machine();

        assert!(presence.check_in(MarkerId(42), 0).is_ok());
        assert_eq!(presence.check_in(MarkerId(42), 100), Err(PresenceError::AlreadyCheckedIn));
        assert_eq!(presence.checked_in_count(), 1);
    }

    #[test]
    fn test_checkout_before_checkin_rejected() {
        let mut presence = machine();

        assert_eq!(presence.check_out(MarkerId(42), 0), Err(PresenceError::NoActiveSession));
    }

    #[test]
    fn test_double_checkout_rejected() {
        let mut presence = machine();

        presence.check_in(MarkerId(42), 0).unwrap();
        assert!(presence.check_out(MarkerId(42), 1000).is_ok());
        assert_eq!(presence.check_out(MarkerId(42), 2000), Err(PresenceError::NoActiveSession));
    }

    #[test]
    fn test_cooldown_window() {
        let mut presence = machine();

        // check-in at t=0s, checkout at t=1s, cooldown 10s
        presence.check_in(MarkerId(42), 0).unwrap();
        presence.check_out(MarkerId(42), 1000).unwrap();

        // t=5s: 6s of cooldown remain
        assert_eq!(
            presence.check_in(MarkerId(42), 5000),
            Err(PresenceError::CooldownActive { remaining_ms: 6000 })
        );
        assert_eq!(
            presence.status_for(MarkerId(42), 5000),
            MarkerStatus::Cooldown { remaining_ms: 6000 }
        );

        // t=11s: cooldown elapsed
        assert_eq!(presence.status_for(MarkerId(42), 11_000), MarkerStatus::CanCheckIn);
        let record = presence.check_in(MarkerId(42), 11_000).unwrap();
        assert_eq!(record.check_in_ms, 11_000);
    }

    #[test]
    fn test_new_visit_gets_fresh_record() {
        let mut presence = machine();

        let first = presence.check_in(MarkerId(42), 0).unwrap();
        presence.check_out(MarkerId(42), 1000).unwrap();
        let second = presence.check_in(MarkerId(42), 20_000).unwrap();

        assert_ne!(first.sid, second.sid);
        assert!(second.check_out_ms.is_none());
    }

    #[test]
    fn test_zero_cooldown_variant() {
        let mut presence = PresenceStateMachine::new(0);

        presence.check_in(MarkerId(42), 0).unwrap();
        // Still blocked while checked in
        assert_eq!(presence.check_in(MarkerId(42), 1), Err(PresenceError::AlreadyCheckedIn));
        presence.check_out(MarkerId(42), 100).unwrap();
        // But eligible again immediately after checkout
        assert!(presence.check_in(MarkerId(42), 100).is_ok());
    }

    #[test]
    fn test_clock_skew_during_cooldown() {
        let mut presence = machine();

        presence.check_in(MarkerId(42), 10_000).unwrap();
        presence.check_out(MarkerId(42), 11_000).unwrap();

        // now before checkout time: full cooldown remains, no underflow
        assert_eq!(
            presence.status_for(MarkerId(42), 10_500),
            MarkerStatus::Cooldown { remaining_ms: DEFAULT_COOLDOWN_MS }
        );
    }

    #[test]
    fn test_markers_are_independent() {
        let mut presence = machine();

        presence.check_in(MarkerId(1), 0).unwrap();
        presence.check_in(MarkerId(2), 0).unwrap();
        presence.check_out(MarkerId(1), 500).unwrap();

        assert_eq!(presence.checked_in_count(), 1);
        assert_eq!(presence.status_for(MarkerId(2), 1000), MarkerStatus::CheckedIn);
    }
}
