//! Off-grid synchronization toward the utility grid
//!
//! While the station runs islanded, the converter frequency reference is
//! nudged toward the measured grid frequency so the main switch can close
//! without a phase jump. Synchronization only runs while the inverter
//! voltage sits inside a narrow band below the grid voltage; a
//! reconnection window bounds the whole attempt, after which the
//! references fall back to nominal and hold there.
//!
//! All decisions take an explicit wall-clock instant so the timing paths
//! are testable.

use crate::devices::MeterReading;
use crate::registers::NOMINAL_REFERENCE;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// Nominal grid frequency in mHz, the per-unit base
const NOMINAL_FREQUENCY_MHZ: f32 = 50_000.0;

/// Nominal phase voltage in mV, the per-unit base
const NOMINAL_VOLTAGE_MV: f32 = 230_000.0;

/// Acceptable grid-minus-inverter voltage difference, mV (open interval)
const VOLTAGE_BAND_LOW_MV: i64 = -5;
const VOLTAGE_BAND_HIGH_MV: i64 = 15;

/// Measurements feeding one synchronization decision
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncInput {
    /// Converter frequency, per-unit
    pub converter_frequency_pu: f32,
    /// Converter phase voltage, per-unit
    pub converter_voltage_pu: f32,
    /// Grid-side measurement, `None` when the meter is unreachable
    pub grid: Option<MeterReading>,
}

/// Voltage and frequency references for the command block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncReferences {
    pub u0: f32,
    pub f0: f32,
}

impl SyncReferences {
    fn nominal() -> Self {
        Self {
            u0: NOMINAL_REFERENCE,
            f0: NOMINAL_REFERENCE,
        }
    }
}

/// Tracks the off-grid reconnection window and computes the references
#[derive(Debug)]
pub struct GridSyncMonitor {
    reconnect_timeout: Duration,
    off_grid_since: Option<DateTime<Utc>>,
}

impl GridSyncMonitor {
    pub fn new(reconnect_timeout_secs: u64) -> Self {
        let secs = i64::try_from(reconnect_timeout_secs).unwrap_or(i64::MAX);
        Self {
            reconnect_timeout: Duration::seconds(secs),
            off_grid_since: None,
        }
    }

    /// Called every tick the station is on-grid; resets the window
    pub fn on_grid_tick(&mut self) {
        if self.off_grid_since.take().is_some() {
            debug!("Back on grid, reconnection window cleared");
        }
    }

    /// Whether the reconnection window has run out
    pub fn window_expired(&self, now: DateTime<Utc>) -> bool {
        self.off_grid_since
            .is_some_and(|since| now - since >= self.reconnect_timeout)
    }

    /// Compute references for one off-grid tick. The first call after
    /// going off-grid opens the reconnection window.
    pub fn off_grid_references(&mut self, input: SyncInput, now: DateTime<Utc>) -> SyncReferences {
        let since = *self.off_grid_since.get_or_insert(now);

        if now - since >= self.reconnect_timeout {
            warn!(
                "Reconnection window expired after {}s, holding nominal references",
                self.reconnect_timeout.num_seconds()
            );
            return SyncReferences::nominal();
        }

        let Some(grid) = input.grid else {
            debug!("Grid meter unavailable, holding nominal references");
            return SyncReferences::nominal();
        };

        // A dead grid meter reading or a converter that is not reporting a
        // plausible frequency cannot be steered toward.
        if grid.frequency_mhz == 0 || input.converter_frequency_pu <= 0.0 {
            return SyncReferences::nominal();
        }

        #[allow(clippy::cast_possible_truncation)]
        let inverter_frequency_mhz =
            (input.converter_frequency_pu * NOMINAL_FREQUENCY_MHZ).round() as i64;
        #[allow(clippy::cast_possible_truncation)]
        let inverter_voltage_mv =
            (input.converter_voltage_pu * NOMINAL_VOLTAGE_MV).round() as i64;

        let frequency_diff_mhz = grid.frequency_mhz - inverter_frequency_mhz;
        let voltage_diff_mv = grid.voltage_mv - inverter_voltage_mv;

        if voltage_diff_mv <= VOLTAGE_BAND_LOW_MV || voltage_diff_mv >= VOLTAGE_BAND_HIGH_MV {
            debug!(
                voltage_diff_mv,
                "Inverter voltage outside synchronization band"
            );
            return SyncReferences::nominal();
        }

        // Close half the frequency gap each tick, expressed per-unit
        #[allow(clippy::cast_precision_loss)]
        let adjustment = (frequency_diff_mhz as f32 / 2.0) / NOMINAL_FREQUENCY_MHZ;
        let f0 = input.converter_frequency_pu + adjustment;

        debug!(
            frequency_diff_mhz,
            voltage_diff_mv, f0, "Blending frequency reference toward grid"
        );

        SyncReferences {
            u0: NOMINAL_REFERENCE,
            f0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn grid(frequency_mhz: i64, voltage_mv: i64) -> Option<MeterReading> {
        Some(MeterReading {
            frequency_mhz,
            voltage_mv,
        })
    }

    #[test]
    fn blends_half_the_frequency_gap() {
        let mut monitor = GridSyncMonitor::new(600);
        // Converter at exactly 1.0 pu (50 000 mHz), grid at 50 100 mHz
        let refs = monitor.off_grid_references(
            SyncInput {
                converter_frequency_pu: 1.0,
                converter_voltage_pu: 1.0,
                grid: grid(50_100, 230_000),
            },
            at(0),
        );
        assert_eq!(refs.u0, 1.0);
        assert!((refs.f0 - 1.001).abs() < 1e-6);
    }

    #[test]
    fn voltage_band_is_open_interval() {
        let mut monitor = GridSyncMonitor::new(600);
        let input_at = |voltage_mv| SyncInput {
            converter_frequency_pu: 1.0,
            converter_voltage_pu: 1.0,
            grid: grid(50_100, voltage_mv),
        };

        // Differences of -5 and +15 mV are outside the band
        assert_eq!(
            monitor.off_grid_references(input_at(230_000 - 5), at(0)).f0,
            1.0
        );
        assert_eq!(
            monitor.off_grid_references(input_at(230_000 + 15), at(1)).f0,
            1.0
        );
        // -4 and +14 are inside
        assert!(monitor.off_grid_references(input_at(230_000 - 4), at(2)).f0 > 1.0);
        assert!(monitor.off_grid_references(input_at(230_000 + 14), at(3)).f0 > 1.0);
    }

    #[test]
    fn dead_meter_or_dead_grid_holds_nominal() {
        let mut monitor = GridSyncMonitor::new(600);
        let no_meter = SyncInput {
            converter_frequency_pu: 1.0,
            converter_voltage_pu: 1.0,
            grid: None,
        };
        assert_eq!(
            monitor.off_grid_references(no_meter, at(0)),
            SyncReferences { u0: 1.0, f0: 1.0 }
        );

        let dead_grid = SyncInput {
            converter_frequency_pu: 1.0,
            converter_voltage_pu: 1.0,
            grid: grid(0, 230_000),
        };
        assert_eq!(monitor.off_grid_references(dead_grid, at(1)).f0, 1.0);
    }

    #[test]
    fn silent_converter_holds_nominal() {
        let mut monitor = GridSyncMonitor::new(600);
        let refs = monitor.off_grid_references(
            SyncInput {
                converter_frequency_pu: 0.0,
                converter_voltage_pu: 0.0,
                grid: grid(50_000, 230_000),
            },
            at(0),
        );
        // Never emit a zero or garbage reference from a silent converter
        assert_eq!(refs, SyncReferences { u0: 1.0, f0: 1.0 });
    }

    #[test]
    fn window_expires_after_timeout() {
        let mut monitor = GridSyncMonitor::new(600);
        let input = SyncInput {
            converter_frequency_pu: 1.0,
            converter_voltage_pu: 1.0,
            grid: grid(50_100, 230_000),
        };

        assert!(monitor.off_grid_references(input, at(0)).f0 > 1.0);
        assert!(!monitor.window_expired(at(599)));
        assert!(monitor.off_grid_references(input, at(599)).f0 > 1.0);

        assert!(monitor.window_expired(at(600)));
        assert_eq!(monitor.off_grid_references(input, at(600)).f0, 1.0);
        assert_eq!(monitor.off_grid_references(input, at(10_000)).f0, 1.0);
    }

    #[test]
    fn on_grid_tick_resets_the_window() {
        let mut monitor = GridSyncMonitor::new(600);
        let input = SyncInput {
            converter_frequency_pu: 1.0,
            converter_voltage_pu: 1.0,
            grid: grid(50_100, 230_000),
        };

        let _ = monitor.off_grid_references(input, at(0));
        monitor.on_grid_tick();
        assert!(!monitor.window_expired(at(10_000)));
        // A fresh off-grid excursion gets a fresh window
        assert!(monitor.off_grid_references(input, at(10_000)).f0 > 1.0);
        assert!(!monitor.window_expired(at(10_599)));
        assert!(monitor.window_expired(at(10_600)));
    }
}
