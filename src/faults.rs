//! Fault acknowledgement
//!
//! When the CCU sits in its error state the sequencer pulses the
//! acknowledge flag to clear latched, recoverable faults. The pulse is
//! rate limited so a persistent fault is not hammered with acknowledge
//! cycles, and hardware trips are never auto-acknowledged.

use chrono::{DateTime, Duration, Utc};
use tracing::info;

/// Rate-limits acknowledge pulses against the wall clock
#[derive(Debug)]
pub struct AcknowledgeHandler {
    interval: Duration,
    last_pulse: Option<DateTime<Utc>>,
}

impl AcknowledgeHandler {
    pub fn new(interval_secs: u64) -> Self {
        let secs = i64::try_from(interval_secs).unwrap_or(i64::MAX);
        Self {
            interval: Duration::seconds(secs),
            last_pulse: None,
        }
    }

    /// Whether to assert the acknowledge flag this tick. Returns true at
    /// most once per interval; a hardware trip suppresses the pulse
    /// entirely so the fault stays visible for manual intervention.
    pub fn should_acknowledge(&mut self, error_code: u32, now: DateTime<Utc>) -> bool {
        if is_hardware_trip(error_code) {
            return false;
        }
        let due = self
            .last_pulse
            .is_none_or(|last| now - last >= self.interval);
        if due {
            self.last_pulse = Some(now);
            info!(error_code, "Pulsing fault acknowledge");
        }
        due
    }

    /// Forget the rate-limit history, e.g. after the CCU leaves its error
    /// state
    pub fn reset(&mut self) {
        self.last_pulse = None;
    }
}

/// Whether an error code marks a hardware trip that must not be cleared
/// automatically.
///
/// TODO: populate from the MR error code list once the vendor table is
/// available; until then every fault is treated as recoverable.
fn is_hardware_trip(_error_code: u32) -> bool {
    false
}
