//! Core driver logic for the gridcon station
//!
//! This module contains the poll loop and orchestration logic that ties the
//! Modbus transport, the CCU sequencer and the collaborator devices
//! together. One poll cycle reads the converter status, runs one sequencer
//! tick and flushes the full outbound image back to the hardware.

use crate::allocation::{Allocator, PowerRequest, STRING_COUNT};
use crate::ccu::CcuState;
use crate::config::Config;
use crate::devices::{Battery, BatteryLimits, DigitalInputs, GridMeter, weighted_soc};
use crate::error::{GridconError, Result};
use crate::logging::get_logger;
use crate::modbus::ModbusConnectionManager;
use crate::registers::{
    CCU_STATUS_BLOCK, CcuStatus, COMMAND_MIRROR_BLOCK, CommandMirror, DCDC_MEASUREMENT_BLOCKS,
    DcdcMeasurements, IPU_STATUS_BLOCKS, IpuStatus, WriteImage,
};
use crate::sequencer::{Sequencer, TickInputs};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Duration, interval};

/// Main driver state
#[derive(Debug, Clone)]
pub enum DriverState {
    /// Driver is initializing
    Initializing,
    /// Driver is running normally
    Running,
    /// Driver is in error state
    Error(String),
    /// Driver is shutting down
    ShuttingDown,
}

/// Commands accepted by the driver from external components
#[derive(Debug, Clone)]
pub enum DriverCommand {
    /// Set the active/reactive power request, whole watts / VAr
    SetPower { active_w: i32, reactive_var: i32 },
    /// Stop the converter and shut the driver down
    Shutdown,
}

/// Snapshot of the station published after each poll cycle
#[derive(Debug, Clone, Serialize, Default)]
pub struct DriverSnapshot {
    /// Interpreted CCU state name
    pub ccu_state: String,
    /// CCU error code, zero when healthy
    pub error_code: u32,
    /// Capacity-weighted state of charge, percent
    pub soc: f32,
    /// Total active power at the DC links, W (positive = discharge)
    pub active_power_w: f32,
    /// Active power request currently applied
    pub requested_power_w: f32,
    /// Chargeable power across the online strings, W
    pub allowed_charge_w: f32,
    /// Dischargeable power across the online strings, W
    pub allowed_discharge_w: f32,
    /// Grid connection per the disconnect switch
    pub on_grid: bool,
    /// Main switch position
    pub main_switch_closed: bool,
    /// Bridge contactor feedback
    pub bridge_contactor_closed: bool,
    /// Whether the last poll cycle reached the CCU
    pub connected: bool,
    /// Wall-clock time of the last successful poll
    pub last_update: Option<DateTime<Utc>>,
}

/// Main driver for the gridcon station
pub struct GridconDriver {
    /// Configuration
    config: Config,

    /// Current driver state
    state: watch::Sender<DriverState>,

    /// Modbus connection manager
    modbus_manager: Option<ModbusConnectionManager>,

    /// Logger with context
    logger: crate::logging::StructuredLogger,

    /// Shutdown signal
    shutdown_tx: mpsc::UnboundedSender<()>,

    /// Shutdown receiver
    shutdown_rx: mpsc::UnboundedReceiver<()>,

    /// Per-tick command sequencer
    sequencer: Sequencer,

    /// Allocation engine, for allowed-power telemetry
    allocator: Allocator,

    /// Persistent outbound image, flushed in full every cycle
    image: WriteImage,

    /// Battery strings on the DC/DC combiner, in string order
    batteries: Vec<Arc<dyn Battery>>,

    /// Utility meter at the point of common coupling
    meter: Arc<dyn GridMeter>,

    /// Station digital inputs
    digital_inputs: Arc<dyn DigitalInputs>,

    /// Active site request
    request: PowerRequest,

    /// Latest decoded low-priority telemetry
    ipu_status: [IpuStatus; 4],
    dcdc_measurements: [DcdcMeasurements; 4],
    command_mirror: CommandMirror,

    /// Poll cycle counter, drives the low-priority cadence
    cycle: u64,

    /// Latest published snapshot
    snapshot: DriverSnapshot,

    /// Command receiver for external control
    commands_rx: mpsc::UnboundedReceiver<DriverCommand>,

    /// Broadcast channel for streaming live status updates
    status_tx: broadcast::Sender<String>,
}

impl GridconDriver {
    /// Create a new driver instance
    pub fn new(
        config: Config,
        batteries: Vec<Arc<dyn Battery>>,
        meter: Arc<dyn GridMeter>,
        digital_inputs: Arc<dyn DigitalInputs>,
        commands_rx: mpsc::UnboundedReceiver<DriverCommand>,
    ) -> Result<Self> {
        config.validate()?;
        crate::logging::init_logging(&config.logging)?;

        let logger = get_logger("driver");
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(DriverState::Initializing);
        let (status_tx, _status_rx) = broadcast::channel::<String>(100);

        logger.info("Initializing gridcon station driver");

        let sequencer = Sequencer::new(&config);
        let allocator = Allocator::new(
            config.ratings.rated_power_w,
            config.ratings.max_charge_w,
            config.ratings.max_discharge_w,
        );

        Ok(Self {
            config,
            state: state_tx,
            modbus_manager: None,
            logger,
            shutdown_tx,
            shutdown_rx,
            sequencer,
            allocator,
            image: WriteImage::default(),
            batteries,
            meter,
            digital_inputs,
            request: PowerRequest::default(),
            ipu_status: [IpuStatus::default(); 4],
            dcdc_measurements: [DcdcMeasurements::default(); 4],
            command_mirror: CommandMirror::default(),
            cycle: 0,
            snapshot: DriverSnapshot::default(),
            commands_rx,
            status_tx,
        })
    }

    /// Sender half of the shutdown channel, for signal handlers
    pub fn shutdown_sender(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    /// Subscribe to the live status stream (JSON per poll cycle)
    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status_tx.subscribe()
    }

    /// Watch the driver lifecycle state
    pub fn watch_state(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> &DriverSnapshot {
        &self.snapshot
    }

    /// Capacity-weighted state of charge from the last poll, percent
    pub fn soc(&self) -> f32 {
        self.snapshot.soc
    }

    /// Diagnostic status string for the last poll
    pub fn status_string(&self) -> String {
        format!(
            "{}{}",
            self.snapshot.ccu_state,
            if self.snapshot.on_grid {
                ""
            } else {
                " (off-grid)"
            }
        )
    }

    /// Latest decoded per-IPU telemetry
    pub fn ipu_status(&self) -> &[IpuStatus; 4] {
        &self.ipu_status
    }

    /// Latest decoded DC/DC string telemetry
    pub fn dcdc_measurements(&self) -> &[DcdcMeasurements; 4] {
        &self.dcdc_measurements
    }

    /// Last command echo read back from the CCU
    pub fn command_mirror(&self) -> &CommandMirror {
        &self.command_mirror
    }

    /// Run the driver main loop
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting gridcon driver main loop");

        self.initialize_modbus().await?;
        self.state.send(DriverState::Running).ok();

        let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_cycle().await {
                        self.logger.warn(&format!("Poll cycle failed: {}", e));
                        self.snapshot.connected = false;
                        self.publish_status();
                    }
                }
                Some(command) = self.commands_rx.recv() => {
                    if self.handle_command(command) {
                        break;
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    async fn initialize_modbus(&mut self) -> Result<()> {
        let manager = ModbusConnectionManager::new(
            &self.config.modbus,
            5,
            Duration::from_secs(2),
        );
        self.modbus_manager = Some(manager);
        Ok(())
    }

    fn manager(&mut self) -> Result<&mut ModbusConnectionManager> {
        self.modbus_manager
            .as_mut()
            .ok_or_else(|| GridconError::modbus("Modbus manager not initialized"))
    }

    /// Returns true when the driver should leave the main loop
    fn handle_command(&mut self, command: DriverCommand) -> bool {
        match command {
            DriverCommand::SetPower {
                active_w,
                reactive_var,
            } => {
                #[allow(clippy::cast_precision_loss)]
                {
                    self.request = PowerRequest {
                        active_w: active_w as f32,
                        reactive_var: reactive_var as f32,
                    };
                }
                self.logger.debug(&format!(
                    "Power request updated: {} W / {} var",
                    active_w, reactive_var
                ));
                false
            }
            DriverCommand::Shutdown => {
                self.logger.info("Shutdown command received");
                true
            }
        }
    }

    /// One full poll cycle: read, sequence, flush, publish. A failed CCU
    /// read degrades to default readings (UNDEFINED state, passive profile)
    /// rather than skipping the cycle, so the outbound image still goes out.
    async fn poll_cycle(&mut self) -> Result<()> {
        let now = Utc::now();

        let (ccu, connected) = match self.read_ccu_status().await {
            Ok(ccu) => (ccu, true),
            Err(e) => {
                self.logger
                    .warn(&format!("CCU status read failed, sequencing with defaults: {}", e));
                (CcuStatus::default(), false)
            }
        };

        if self.cycle % u64::from(self.config.low_priority_divisor) == 0 {
            self.refresh_low_priority().await;
        }
        self.cycle = self.cycle.wrapping_add(1);

        let strings = self.collect_string_limits().await;
        let grid = self.meter.reading().await;
        let on_grid = self
            .digital_inputs
            .disconnect_switch()
            .await
            .unwrap_or(true);
        let main_switch_closed = self.digital_inputs.main_switch().await;
        let bridge_contactor_closed = self.digital_inputs.bridge_contactor().await;

        let inputs = TickInputs {
            ccu,
            on_grid,
            grid,
            request: self.request,
            strings,
        };
        let ccu_state = self.sequencer.tick(&inputs, now, &mut self.image);

        let flushed = match self.flush_image().await {
            Ok(()) => true,
            Err(e) => {
                self.logger.warn(&format!("Image flush incomplete: {}", e));
                false
            }
        };

        self.update_snapshot(
            ccu_state,
            &ccu,
            &strings,
            on_grid,
            main_switch_closed,
            bridge_contactor_closed,
            connected && flushed,
            now,
        );
        self.publish_status();
        Ok(())
    }

    async fn read_ccu_status(&mut self) -> Result<CcuStatus> {
        let block = CCU_STATUS_BLOCK;
        let regs = self
            .manager()?
            .read_holding_registers(block.start, block.count)
            .await?;
        CcuStatus::from_registers(&regs)
    }

    /// Refresh the low-priority telemetry blocks, best effort
    async fn refresh_low_priority(&mut self) {
        for (i, block) in IPU_STATUS_BLOCKS.iter().enumerate() {
            let read = {
                let Ok(manager) = self.manager() else { return };
                manager.read_holding_registers(block.start, block.count).await
            };
            match read.and_then(|regs| IpuStatus::from_registers(&regs)) {
                Ok(status) => self.ipu_status[i] = status,
                Err(e) => self
                    .logger
                    .debug(&format!("IPU {} status read failed: {}", i + 1, e)),
            }
        }

        for (i, block) in DCDC_MEASUREMENT_BLOCKS.iter().enumerate() {
            let read = {
                let Ok(manager) = self.manager() else { return };
                manager.read_holding_registers(block.start, block.count).await
            };
            match read.and_then(|regs| DcdcMeasurements::from_registers(&regs)) {
                Ok(measurements) => self.dcdc_measurements[i] = measurements,
                Err(e) => self
                    .logger
                    .debug(&format!("DC/DC {} measurement read failed: {}", i + 1, e)),
            }
        }

        let mirror = {
            let Ok(manager) = self.manager() else { return };
            manager
                .read_holding_registers(COMMAND_MIRROR_BLOCK.start, COMMAND_MIRROR_BLOCK.count)
                .await
        };
        match mirror.and_then(|regs| CommandMirror::from_registers(&regs)) {
            Ok(mirror) => self.command_mirror = mirror,
            Err(e) => self
                .logger
                .debug(&format!("Command mirror read failed: {}", e)),
        }
    }

    async fn collect_string_limits(&self) -> [Option<BatteryLimits>; STRING_COUNT] {
        let mut strings = [None; STRING_COUNT];
        for (slot, battery) in strings.iter_mut().zip(self.batteries.iter()) {
            if battery.is_available().await {
                *slot = Some(battery.limits().await);
            }
        }
        strings
    }

    /// Write every outbound block back to the CCU. The full image goes out
    /// each cycle so the hardware never holds a stale half of a block, and
    /// every block is attempted even when an earlier one fails.
    async fn flush_image(&mut self) -> Result<()> {
        self.logger
            .trace(&format!("Command block: {}", self.image.command));
        let blocks = self.image.blocks();
        let manager = self.manager()?;
        let mut failures = Vec::new();
        for (start, values) in blocks {
            if let Err(e) = manager.write_multiple_registers(start, &values).await {
                failures.push((start, e));
            }
        }
        for (start, e) in &failures {
            self.logger
                .warn(&format!("Write of block at {} failed: {}", start, e));
        }
        match failures.into_iter().next() {
            None => Ok(()),
            Some((_, e)) => Err(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn update_snapshot(
        &mut self,
        ccu_state: CcuState,
        ccu: &CcuStatus,
        strings: &[Option<BatteryLimits>; STRING_COUNT],
        on_grid: bool,
        main_switch_closed: bool,
        bridge_contactor_closed: bool,
        connected: bool,
        now: DateTime<Utc>,
    ) {
        let limits: Vec<BatteryLimits> = strings.iter().flatten().copied().collect();
        let allocation = self.allocator.allocate(PowerRequest::default(), strings);

        // DC link power is measured into the converter; site convention is
        // positive out
        let active_power_w: f32 = -self.ipu_status[..3]
            .iter()
            .map(|s| s.dc_link_active_power)
            .sum::<f32>();

        self.snapshot = DriverSnapshot {
            ccu_state: ccu_state.to_string(),
            error_code: ccu.error_code,
            soc: weighted_soc(&limits),
            active_power_w,
            requested_power_w: self.request.active_w,
            allowed_charge_w: allocation.allowed_charge_w,
            allowed_discharge_w: allocation.allowed_discharge_w,
            on_grid,
            main_switch_closed,
            bridge_contactor_closed,
            connected,
            last_update: Some(now),
        };
    }

    fn publish_status(&self) {
        if let Ok(json) = serde_json::to_string(&self.snapshot) {
            let _ = self.status_tx.send(json);
        }
    }

    /// Stop the converter and tear the connection down
    async fn shutdown(&mut self) -> Result<()> {
        self.state.send(DriverState::ShuttingDown).ok();
        self.logger.info("Stopping converter");

        Sequencer::apply_stop(&mut self.image, Utc::now());
        if let Err(e) = self.flush_image().await {
            // The stop profile is best effort; the hardware watchdog takes
            // over once the link is gone
            self.logger.warn(&format!("Failed to write stop profile: {}", e));
        }

        self.logger.info("Driver stopped");
        Ok(())
    }
}
