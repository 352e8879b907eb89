//! Frame-driven presence tracking loop
//!
//! Consumes decoded frame observations, classifies each detected marker into
//! a zone, feeds the dwell accumulator and drives automatic check-in for
//! markers standing in the eligible zone. All shared state lives behind one
//! mutex held only for in-memory bookkeeping; report delivery happens outside
//! the lock.

use crate::domain::session::{epoch_ms, SessionStart};
use crate::domain::types::{FrameObservation, MarkerId, MarkerStatus};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::reporting::{Report, ReportSender};
use crate::services::dwell::DwellAccumulator;
use crate::services::presence::PresenceStateMachine;
use crate::services::zone;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Dwell and presence state shared between the tracker, the reporter and the
/// control API
pub struct PresenceCore {
    pub dwell: DwellAccumulator,
    pub presence: PresenceStateMachine,
}

impl PresenceCore {
    pub fn new(zone_count: u8, cooldown_ms: u64) -> Self {
        Self {
            dwell: DwellAccumulator::new(zone_count),
            presence: PresenceStateMachine::new(cooldown_ms),
        }
    }
}

pub type SharedCore = Arc<Mutex<PresenceCore>>;

pub fn new_shared_core(zone_count: u8, cooldown_ms: u64) -> SharedCore {
    Arc::new(Mutex::new(PresenceCore::new(zone_count, cooldown_ms)))
}

pub struct Tracker {
    core: SharedCore,
    reports: ReportSender,
    metrics: Arc<Metrics>,
    camera_id: String,
    artwork_id: String,
    zone_count: u8,
    eligible_zone: u8,
    auto_checkin: bool,
}

impl Tracker {
    pub fn new(
        config: &Config,
        core: SharedCore,
        reports: ReportSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            core,
            reports,
            metrics,
            camera_id: config.camera_id().to_string(),
            artwork_id: config.artwork_id().to_string(),
            zone_count: config.zone_count(),
            eligible_zone: config.eligible_zone(),
            auto_checkin: config.auto_checkin(),
        }
    }

    /// Main loop: drain frames until shutdown
    pub async fn run(
        mut self,
        mut frame_rx: mpsc::Receiver<FrameObservation>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            eligible_zone = %self.eligible_zone,
            auto_checkin = %self.auto_checkin,
            "tracker_started"
        );

        loop {
            tokio::select! {
                maybe_frame = frame_rx.recv() => {
                    match maybe_frame {
                        Some(frame) => self.process_frame(frame),
                        None => {
                            info!("frame_channel_closed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("tracker_shutdown");
                        break;
                    }
                }
            }
        }
    }

    pub fn process_frame(&mut self, frame: FrameObservation) {
        let now_ms = epoch_ms();
        self.metrics.record_frame_latency(now_ms.saturating_sub(frame.frame_ms));

        let classified: Vec<(MarkerId, crate::domain::types::ZoneIndex)> = frame
            .markers
            .iter()
            .map(|m| (m.marker_id, zone::classify(m.position[0], frame.width, self.zone_count)))
            .collect();

        let mut started: Vec<MarkerId> = Vec::new();
        let mut checkins = Vec::new();
        {
            let mut core = self.core.lock();
            for &(marker_id, zone) in &classified {
                if core.dwell.observe(marker_id, zone, frame.frame_ms) {
                    started.push(marker_id);
                }
                if self.auto_checkin
                    && zone.0 == self.eligible_zone
                    && core.presence.status_for(marker_id, frame.frame_ms)
                        == MarkerStatus::CanCheckIn
                {
                    if let Ok(record) = core.presence.check_in(marker_id, frame.frame_ms) {
                        checkins.push(record);
                    }
                }
            }
        }

        self.metrics.record_frame_processed(classified.len());

        for marker_id in started {
            self.metrics.record_session_start();
            self.reports.send(Report::Start(SessionStart {
                camera_id: self.camera_id.clone(),
                artwork_id: self.artwork_id.clone(),
                marker_id,
                at_ms: frame.frame_ms,
            }));
        }
        for record in checkins {
            self.metrics.record_checkin();
            self.reports.send(Report::CheckIn(self.visit_report(record)));
        }
    }

    fn visit_report(
        &self,
        record: crate::domain::session::CheckInRecord,
    ) -> crate::domain::session::VisitReport {
        crate::domain::session::VisitReport {
            camera_id: self.camera_id.clone(),
            artwork_id: self.artwork_id.clone(),
            record,
        }
    }
}
