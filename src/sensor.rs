//! Rain and wind state derived from hub limitation reports.
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::messages::{LimitationOrigin, LimitationStatus, StatusReply};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SensorStatus {
    pub rain_detected: bool,
    pub wind_detected: bool,
    /// Time of the last reading or refresh attempt; `None` until the first.
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct SensorTracker {
    status: RwLock<SensorStatus>,
}

impl SensorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SensorStatus {
        *self.status.read()
    }

    /// Rain and wind origins set their flag; `None` clears both. Other
    /// origins only advance `last_update`.
    pub fn apply_limitation(&self, limitation: &LimitationStatus) {
        let mut status = self.status.write();
        status.last_update = Some(Utc::now());
        match limitation.origin {
            LimitationOrigin::Rain => status.rain_detected = true,
            LimitationOrigin::Wind => status.wind_detected = true,
            LimitationOrigin::None => {
                status.rain_detected = false;
                status.wind_detected = false;
            }
            _ => {}
        }
    }

    /// A command blocked by rain or wind is evidence of that condition.
    pub fn apply_run_status_side_effect(&self, reply: StatusReply) {
        let mut status = self.status.write();
        status.last_update = Some(Utc::now());
        match reply {
            StatusReply::LimitationByRain => {
                status.rain_detected = true;
                info!("rain detected from run status");
            }
            StatusReply::LimitationByWind => {
                status.wind_detected = true;
                info!("wind detected from run status");
            }
            _ => {}
        }
    }

    /// Marks an inconclusive refresh: flags stay, the timestamp moves.
    pub fn record_attempt(&self) {
        self.status.write().last_update = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limitation(origin: LimitationOrigin) -> LimitationStatus {
        LimitationStatus {
            node_id: 1,
            origin,
            min_raw: 0,
            max_raw: 0xC800,
        }
    }

    #[test]
    fn rain_and_wind_origins_set_flags() {
        let tracker = SensorTracker::new();
        assert_eq!(tracker.status(), SensorStatus::default());

        tracker.apply_limitation(&limitation(LimitationOrigin::Rain));
        tracker.apply_limitation(&limitation(LimitationOrigin::Wind));
        let status = tracker.status();
        assert!(status.rain_detected && status.wind_detected);

        tracker.apply_limitation(&limitation(LimitationOrigin::Timer));
        assert!(tracker.status().rain_detected);

        tracker.apply_limitation(&limitation(LimitationOrigin::None));
        let status = tracker.status();
        assert!(!status.rain_detected && !status.wind_detected);
    }

    #[test]
    fn run_status_replies_raise_flags() {
        let tracker = SensorTracker::new();
        tracker.apply_run_status_side_effect(StatusReply::CommandCompletedOk);
        assert!(!tracker.status().rain_detected);

        tracker.apply_run_status_side_effect(StatusReply::LimitationByWind);
        assert!(tracker.status().wind_detected);
        assert!(!tracker.status().rain_detected);
    }

    #[test]
    fn record_attempt_keeps_flags() {
        let tracker = SensorTracker::new();
        tracker.apply_limitation(&limitation(LimitationOrigin::Rain));
        let before = tracker.status();

        tracker.record_attempt();
        let after = tracker.status();
        assert!(after.rain_detected);
        assert!(!after.wind_detected);
        assert!(after.last_update >= before.last_update);
    }
}
