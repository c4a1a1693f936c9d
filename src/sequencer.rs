//! Per-tick command sequencing
//!
//! One tick takes a snapshot of everything the control loop knows (CCU
//! status, grid connection, site request, battery limits) and rewrites the
//! outbound image from scratch. The control word is rebuilt each tick so
//! no stale flag can survive a state change, and the full image is flushed
//! by the transport afterwards so the hardware never sees a partially
//! updated block.

use crate::allocation::{Allocator, PowerRequest, STRING_COUNT};
use crate::ccu::{CcuState, ControlFlag, ControlWord};
use crate::config::Config;
use crate::devices::{BatteryLimits, MeterReading};
use crate::faults::AcknowledgeHandler;
use crate::registers::{
    CcuParameters, CcuStatus, CommandBlock, NOMINAL_REFERENCE, PControlMode, WriteImage,
    encode_sync_date, encode_sync_time,
};
use crate::sync::{GridSyncMonitor, SyncInput, SyncReferences};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Everything one tick decision depends on
#[derive(Debug, Clone, Copy, Default)]
pub struct TickInputs {
    /// Decoded high-priority CCU status
    pub ccu: CcuStatus,
    /// Grid connection per the disconnect switch (assumed on-grid when the
    /// switch is not wired)
    pub on_grid: bool,
    /// Grid meter reading, used off-grid for synchronization
    pub grid: Option<MeterReading>,
    /// Active site request
    pub request: PowerRequest,
    /// Limits per battery string, `None` for offline strings
    pub strings: [Option<BatteryLimits>; STRING_COUNT],
}

/// Stateful sequencer; owns the timers that span ticks
pub struct Sequencer {
    allocator: Allocator,
    sync: GridSyncMonitor,
    acknowledge: AcknowledgeHandler,
}

impl Sequencer {
    pub fn new(config: &Config) -> Self {
        Self {
            allocator: Allocator::new(
                config.ratings.rated_power_w,
                config.ratings.max_charge_w,
                config.ratings.max_discharge_w,
            ),
            sync: GridSyncMonitor::new(config.sync.reconnect_timeout_secs),
            acknowledge: AcknowledgeHandler::new(config.faults.acknowledge_interval_secs),
        }
    }

    /// Run one control tick, rewriting `image` in place. Returns the
    /// interpreted CCU state for telemetry.
    pub fn tick(
        &mut self,
        inputs: &TickInputs,
        now: DateTime<Utc>,
        image: &mut WriteImage,
    ) -> CcuState {
        let state = CcuState::from_bits(inputs.ccu.state_bits);

        let references = if inputs.on_grid {
            self.sync.on_grid_tick();
            SyncReferences {
                u0: NOMINAL_REFERENCE,
                f0: NOMINAL_REFERENCE,
            }
        } else {
            self.sync.off_grid_references(
                SyncInput {
                    converter_frequency_pu: inputs.ccu.frequency,
                    converter_voltage_pu: inputs.ccu.voltage_u12 / 230.0,
                    grid: inputs.grid,
                },
                now,
            )
        };

        let mut word = ControlWord::new()
            .with(ControlFlag::ModeSelection)
            .with_if(ControlFlag::SyncApproval, inputs.on_grid)
            .with_if(ControlFlag::ShortCircuitHandling, inputs.on_grid)
            .with_if(ControlFlag::BlackstartApproval, !inputs.on_grid);

        match state {
            CcuState::Idle => {
                // Kick the CCU out of idle; it walks through precharge to
                // run on its own
                word = word.with(ControlFlag::Play);
            }
            CcuState::Error => {
                if self
                    .acknowledge
                    .should_acknowledge(inputs.ccu.error_code, now)
                {
                    word = word.with(ControlFlag::Acknowledge);
                }
            }
            _ => {}
        }
        if !state.is_error() {
            self.acknowledge.reset();
        }

        let allocation = self.allocator.allocate(inputs.request, &inputs.strings);
        image.ccu_parameters = CcuParameters::baseline(PControlMode::ActivePowerControl);

        // Power only flows in RUN; everywhere else the references, bounds
        // and string weights stay zeroed
        let (p_ref, q_ref) = if state.is_running() {
            image.ac_ipu = allocation.ac_ipu;
            image.dcdc = allocation.dcdc;
            (allocation.p_ref, allocation.q_ref)
        } else {
            image.ac_ipu = [Allocator::baseline_ac_ipu(); 3];
            image.dcdc = Allocator::baseline_dcdc();
            (0.0, 0.0)
        };

        // A zero reference would make the hardware regulate toward zero
        // volts or hertz
        let u0 = nonzero_reference(references.u0);
        let f0 = nonzero_reference(references.f0);

        image.command = CommandBlock {
            control_word: word.bits(),
            // Scratch field on the hardware side, written zero every tick
            error_code_feedback: 0,
            u0,
            f0,
            q_ref,
            p_ref,
            sync_date: encode_sync_date(&now),
            sync_time: encode_sync_time(&now),
        };

        debug!(%state, on_grid = inputs.on_grid, p_ref, q_ref, f0, "Tick sequenced");
        state
    }

    /// Overwrite the image with the stop profile: halt the state machine
    /// and disable every inverter unit. Used on graceful shutdown only.
    pub fn apply_stop(image: &mut WriteImage, now: DateTime<Utc>) {
        let word = ControlWord::new()
            .with(ControlFlag::Stop)
            .with(ControlFlag::ModeSelection)
            .with(ControlFlag::DisableIpu1)
            .with(ControlFlag::DisableIpu2)
            .with(ControlFlag::DisableIpu3)
            .with(ControlFlag::DisableIpu4);
        image.command = CommandBlock {
            control_word: word.bits(),
            error_code_feedback: 0,
            u0: NOMINAL_REFERENCE,
            f0: NOMINAL_REFERENCE,
            q_ref: 0.0,
            p_ref: 0.0,
            sync_date: encode_sync_date(&now),
            sync_time: encode_sync_time(&now),
        };
    }
}

fn nonzero_reference(value: f32) -> f32 {
    if value == 0.0 { NOMINAL_REFERENCE } else { value }
}
