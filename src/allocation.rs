//! Power allocation across inverter units and battery strings
//!
//! Watt-level requests from the site controller are turned into per-unit
//! reference fractions for the CCU, per-string current weights for the
//! DC/DC combiner and per-unit power bounds for the AC inverter units.
//! The wire sign convention is inverted with respect to the request:
//! positive request = discharge, but the converter expects a negative
//! reference fraction for power flowing out.

use crate::devices::BatteryLimits;
use crate::registers::{AcIpuParameters, DcdcParameters};

/// DC link voltage setpoint for the DC/DC combiner, V. The AC units get a
/// zero setpoint; only the combiner regulates the link.
pub const DC_LINK_VOLTAGE_SETPOINT: f32 = 800.0;

/// Mode code selecting weighted current sharing across the DC/DC strings
pub const WEIGHTED_CURRENT_SHARING_MODE: f32 = 73.0;

/// Number of AC inverter units
pub const AC_IPU_COUNT: usize = 3;

/// Number of battery strings on the DC/DC combiner
pub const STRING_COUNT: usize = 3;

/// A power request in site convention: positive active power = discharge
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerRequest {
    pub active_w: f32,
    pub reactive_var: f32,
}

/// References, bounds and parameter blocks derived from one request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    /// Active power reference fraction for the command block
    pub p_ref: f32,
    /// Reactive power reference fraction for the command block
    pub q_ref: f32,
    /// Parameter block per AC inverter unit, bounded by its string
    pub ac_ipu: [AcIpuParameters; AC_IPU_COUNT],
    /// Parameter block for the DC/DC string combiner
    pub dcdc: DcdcParameters,
    /// Chargeable power across all strings, W, clamped to the ratings
    pub allowed_charge_w: f32,
    /// Dischargeable power across all strings, W, clamped to the ratings
    pub allowed_discharge_w: f32,
}

/// Stateless allocation engine configured with the converter ratings
#[derive(Debug, Clone, Copy)]
pub struct Allocator {
    rated_power_w: f32,
    max_charge_w: f32,
    max_discharge_w: f32,
}

impl Allocator {
    pub fn new(rated_power_w: f32, max_charge_w: f32, max_discharge_w: f32) -> Self {
        Self {
            rated_power_w,
            max_charge_w,
            max_discharge_w,
        }
    }

    /// Parameter block written while no power flows: everything zero,
    /// including the DC voltage setpoint
    pub fn baseline_ac_ipu() -> AcIpuParameters {
        AcIpuParameters::default()
    }

    /// DC/DC block written while no power flows: weighted sharing with
    /// zero weights
    pub fn baseline_dcdc() -> DcdcParameters {
        DcdcParameters {
            dc_voltage_setpoint: DC_LINK_VOLTAGE_SETPOINT,
            string_control_mode: WEIGHTED_CURRENT_SHARING_MODE,
            ..DcdcParameters::default()
        }
    }

    /// Reference fraction of rated power, sign inverted for the wire
    fn fraction(&self, watts: f32) -> f32 {
        -watts / self.rated_power_w
    }

    /// Current weight of one string. Discharging favors strings with
    /// discharge headroom, charging (and zero) favors charge headroom.
    /// Offline strings carry no weight.
    fn string_weight(active_w: f32, limits: Option<&BatteryLimits>) -> f32 {
        match limits {
            Some(l) if active_w > 0.0 => l.discharge_max_current,
            Some(l) => l.charge_max_current,
            None => 0.0,
        }
    }

    /// Power bounds of the inverter unit fed by one string. Discharge is
    /// transmitted negative, charge positive, per hardware convention.
    fn unit_parameters(limits: Option<&BatteryLimits>) -> AcIpuParameters {
        let Some(l) = limits else {
            return Self::baseline_ac_ipu();
        };
        AcIpuParameters {
            p_max_discharge: -(l.discharge_max_current * l.discharge_min_voltage),
            p_max_charge: l.charge_max_current * l.charge_max_voltage,
            ..AcIpuParameters::default()
        }
    }

    /// Compute the full allocation for one request. `strings` holds the
    /// limits of each connected battery string, `None` for offline ones.
    pub fn allocate(
        &self,
        request: PowerRequest,
        strings: &[Option<BatteryLimits>; STRING_COUNT],
    ) -> Allocation {
        let weights = strings.map(|l| Self::string_weight(request.active_w, l.as_ref()));
        let ac_ipu = strings.map(|l| Self::unit_parameters(l.as_ref()));

        let allowed_charge_w = ac_ipu
            .iter()
            .map(|p| p.p_max_charge)
            .sum::<f32>()
            .min(self.max_charge_w)
            .min(self.rated_power_w);
        let allowed_discharge_w = ac_ipu
            .iter()
            .map(|p| -p.p_max_discharge)
            .sum::<f32>()
            .min(self.max_discharge_w)
            .min(self.rated_power_w);

        Allocation {
            p_ref: self.fraction(request.active_w),
            q_ref: self.fraction(request.reactive_var),
            ac_ipu,
            dcdc: DcdcParameters {
                dc_voltage_setpoint: DC_LINK_VOLTAGE_SETPOINT,
                weight_string_a: weights[0],
                weight_string_b: weights[1],
                weight_string_c: weights[2],
                i_ref_string_a: 0.0,
                i_ref_string_b: 0.0,
                i_ref_string_c: 0.0,
                string_control_mode: WEIGHTED_CURRENT_SHARING_MODE,
            },
            allowed_charge_w,
            allowed_discharge_w,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> Allocator {
        Allocator::new(125_000.0, 86_000.0, 86_000.0)
    }

    fn string(charge_a: f32, discharge_a: f32) -> Option<BatteryLimits> {
        Some(BatteryLimits {
            charge_max_current: charge_a,
            discharge_max_current: discharge_a,
            charge_max_voltage: 900.0,
            discharge_min_voltage: 700.0,
            ..BatteryLimits::default()
        })
    }

    #[test]
    fn full_discharge_maps_to_minus_one() {
        let allocation = allocator().allocate(
            PowerRequest {
                active_w: 125_000.0,
                reactive_var: 0.0,
            },
            &[None, None, None],
        );
        assert!((allocation.p_ref - (-1.0)).abs() < 1e-6);
        assert_eq!(allocation.q_ref, 0.0);
    }

    #[test]
    fn full_charge_maps_to_plus_one() {
        let allocation = allocator().allocate(
            PowerRequest {
                active_w: -125_000.0,
                reactive_var: -62_500.0,
            },
            &[None, None, None],
        );
        assert!((allocation.p_ref - 1.0).abs() < 1e-6);
        assert!((allocation.q_ref - 0.5).abs() < 1e-6);
    }

    #[test]
    fn zero_request_maps_to_zero() {
        let allocation = allocator().allocate(PowerRequest::default(), &[None, None, None]);
        assert_eq!(allocation.p_ref, 0.0);
        assert_eq!(allocation.q_ref, 0.0);
    }

    #[test]
    fn discharge_weights_use_discharge_current() {
        let allocation = allocator().allocate(
            PowerRequest {
                active_w: 10_000.0,
                reactive_var: 0.0,
            },
            &[string(40.0, 70.0), string(40.0, 30.0), None],
        );
        assert_eq!(allocation.dcdc.weight_string_a, 70.0);
        assert_eq!(allocation.dcdc.weight_string_b, 30.0);
        assert_eq!(allocation.dcdc.weight_string_c, 0.0);
    }

    #[test]
    fn charge_and_idle_weights_use_charge_current() {
        let strings = [string(40.0, 70.0), string(25.0, 30.0), string(10.0, 5.0)];
        for active_w in [-10_000.0, 0.0] {
            let allocation = allocator().allocate(
                PowerRequest {
                    active_w,
                    reactive_var: 0.0,
                },
                &strings,
            );
            assert_eq!(allocation.dcdc.weight_string_a, 40.0);
            assert_eq!(allocation.dcdc.weight_string_b, 25.0);
            assert_eq!(allocation.dcdc.weight_string_c, 10.0);
        }
    }

    #[test]
    fn unit_bounds_come_from_string_limits() {
        let allocation = allocator().allocate(
            PowerRequest::default(),
            &[string(40.0, 70.0), None, string(10.0, 5.0)],
        );
        // 40 A x 900 V charge, 70 A x 700 V discharge (negative)
        assert_eq!(allocation.ac_ipu[0].p_max_charge, 36_000.0);
        assert_eq!(allocation.ac_ipu[0].p_max_discharge, -49_000.0);
        // Offline string: zero bounds
        assert_eq!(allocation.ac_ipu[1].p_max_charge, 0.0);
        assert_eq!(allocation.ac_ipu[1].p_max_discharge, 0.0);
        assert_eq!(allocation.ac_ipu[2].p_max_charge, 9_000.0);
    }

    #[test]
    fn only_the_combiner_regulates_the_dc_link() {
        let allocation = allocator().allocate(
            PowerRequest {
                active_w: 10_000.0,
                reactive_var: 0.0,
            },
            &[string(40.0, 70.0), None, None],
        );
        assert_eq!(allocation.dcdc.dc_voltage_setpoint, 800.0);
        for unit in &allocation.ac_ipu {
            assert_eq!(unit.dc_voltage_setpoint, 0.0);
        }
        assert_eq!(Allocator::baseline_ac_ipu().dc_voltage_setpoint, 0.0);
    }

    #[test]
    fn allowed_power_is_clamped_to_the_ratings() {
        // Three strong strings: 3 x 40 A x 900 V = 108 kW, above the 86 kW
        // charge limit
        let strings = [string(40.0, 70.0), string(40.0, 70.0), string(40.0, 70.0)];
        let allocation = allocator().allocate(PowerRequest::default(), &strings);
        assert_eq!(allocation.allowed_charge_w, 86_000.0);
        assert_eq!(allocation.allowed_discharge_w, 86_000.0);

        // A single weak string stays below the clamp
        let allocation = allocator().allocate(PowerRequest::default(), &[string(10.0, 5.0), None, None]);
        assert_eq!(allocation.allowed_charge_w, 9_000.0);
        assert_eq!(allocation.allowed_discharge_w, 3_500.0);
    }

    #[test]
    fn dcdc_block_selects_weighted_sharing() {
        let allocation = allocator().allocate(PowerRequest::default(), &[None, None, None]);
        assert_eq!(allocation.dcdc.string_control_mode, 73.0);
        assert_eq!(allocation.dcdc.dc_voltage_setpoint, 800.0);
        assert_eq!(allocation.dcdc.i_ref_string_a, 0.0);
    }
}
