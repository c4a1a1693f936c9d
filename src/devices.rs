//! Collaborator device interfaces
//!
//! The control loop needs live data from the battery strings, the grid
//! meter and the station digital inputs. These are separate physical
//! devices reached over their own buses, so they sit behind traits and are
//! handed to the driver at construction. Tests substitute fixed-value
//! implementations.

use async_trait::async_trait;

/// Operating limits and telemetry reported by one battery string
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryLimits {
    /// Maximum allowed charge current, A
    pub charge_max_current: f32,
    /// Maximum allowed discharge current, A
    pub discharge_max_current: f32,
    /// Upper voltage bound during charge, V
    pub charge_max_voltage: f32,
    /// Lower voltage bound during discharge, V
    pub discharge_min_voltage: f32,
    /// State of charge, percent
    pub soc: f32,
    /// Usable capacity, Wh
    pub capacity: f32,
}

/// One battery string connected to a DC/DC input
#[async_trait]
pub trait Battery: Send + Sync {
    /// Whether the string is online and its limits are trustworthy
    async fn is_available(&self) -> bool;

    /// Current operating limits; only meaningful when available
    async fn limits(&self) -> BatteryLimits;
}

/// Grid-side measurement from the utility meter
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeterReading {
    /// Grid frequency, mHz
    pub frequency_mhz: i64,
    /// Phase voltage, mV
    pub voltage_mv: i64,
}

/// Utility meter at the point of common coupling
#[async_trait]
pub trait GridMeter: Send + Sync {
    async fn reading(&self) -> Option<MeterReading>;
}

/// Station digital inputs
#[async_trait]
pub trait DigitalInputs: Send + Sync {
    /// Bridge contactor feedback (closed = true)
    async fn bridge_contactor(&self) -> bool;

    /// Main switch position (closed = true)
    async fn main_switch(&self) -> bool;

    /// Grid disconnect switch; `None` when the input is not wired, in
    /// which case the station is treated as on-grid
    async fn disconnect_switch(&self) -> Option<bool>;
}

/// Weighted-average state of charge across the connected strings.
/// Strings with zero capacity contribute nothing; an empty or all-zero set
/// reports zero.
pub fn weighted_soc(limits: &[BatteryLimits]) -> f32 {
    let total_capacity: f32 = limits.iter().map(|l| l.capacity).sum();
    if total_capacity <= 0.0 {
        return 0.0;
    }
    let weighted: f32 = limits.iter().map(|l| l.capacity * l.soc).sum();
    weighted / total_capacity
}
