//! Register map for the gridcon CCU Modbus protocol
//!
//! Every logical field is a doubleword: a 32-bit value transmitted as two
//! consecutive 16-bit registers, least-significant word first. The map is
//! split into read groups (one high-priority CCU block polled every tick,
//! low-priority per-IPU detail blocks polled at reduced cadence) and write
//! blocks (command, CCU parameters, per-IPU parameters). Write blocks are
//! typed structs serialized as a whole so no field is ever partially
//! written; the hardware treats a missing field as "hold previous value",
//! which is unsafe for the frequency/voltage references during black-start.

use crate::error::{GridconError, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Nominal per-unit reference for frequency and voltage
pub const NOMINAL_REFERENCE: f32 = 1.0;

/// Doubleword encoding used by a register map entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Unsigned 32-bit integer across two words
    Unsigned,
    /// IEEE-754 32-bit float across two words
    Float,
}

/// Static description of one logical field
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub address: u16,
    pub encoding: Encoding,
}

/// Read priority of a register block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Polled every tick
    High,
    /// Polled at reduced cadence
    Low,
}

/// A contiguous run of registers read in one request
#[derive(Debug, Clone, Copy)]
pub struct ReadBlock {
    pub start: u16,
    pub count: u16,
    pub priority: Priority,
}

/// Core CCU status and live measurements, polled every tick
pub const CCU_STATUS_BLOCK: ReadBlock = ReadBlock {
    start: 32528,
    count: 22,
    priority: Priority::High,
};

/// Per-IPU status blocks (byte-packed state + measurements)
pub const IPU_STATUS_BLOCKS: [ReadBlock; 4] = [
    ReadBlock {
        start: 33168,
        count: 32,
        priority: Priority::Low,
    },
    ReadBlock {
        start: 33200,
        count: 32,
        priority: Priority::Low,
    },
    ReadBlock {
        start: 33232,
        count: 32,
        priority: Priority::Low,
    },
    ReadBlock {
        start: 33264,
        count: 32,
        priority: Priority::Low,
    },
];

/// Per-IPU DC/DC string measurement blocks
pub const DCDC_MEASUREMENT_BLOCKS: [ReadBlock; 4] = [
    ReadBlock {
        start: 33488,
        count: 32,
        priority: Priority::Low,
    },
    ReadBlock {
        start: 33520,
        count: 32,
        priority: Priority::Low,
    },
    ReadBlock {
        start: 33552,
        count: 32,
        priority: Priority::Low,
    },
    ReadBlock {
        start: 33584,
        count: 32,
        priority: Priority::Low,
    },
];

/// Mirrored echo of the last accepted command block. Diagnostic only -
/// never consulted for control decisions.
pub const COMMAND_MIRROR_BLOCK: ReadBlock = ReadBlock {
    start: 32880,
    count: 12,
    priority: Priority::Low,
};

/// Key fields of the command write block, for diagnostics
pub const COMMAND_FIELDS: [Field; 8] = [
    Field {
        name: "control_word",
        address: 32560,
        encoding: Encoding::Unsigned,
    },
    Field {
        name: "error_code_feedback",
        address: 32562,
        encoding: Encoding::Unsigned,
    },
    Field {
        name: "u0",
        address: 32564,
        encoding: Encoding::Float,
    },
    Field {
        name: "f0",
        address: 32566,
        encoding: Encoding::Float,
    },
    Field {
        name: "q_ref",
        address: 32568,
        encoding: Encoding::Float,
    },
    Field {
        name: "p_ref",
        address: 32570,
        encoding: Encoding::Float,
    },
    Field {
        name: "sync_date",
        address: 32572,
        encoding: Encoding::Unsigned,
    },
    Field {
        name: "sync_time",
        address: 32574,
        encoding: Encoding::Unsigned,
    },
];

/// Encode an unsigned doubleword, least-significant word first
pub fn encode_u32(value: u32) -> [u16; 2] {
    [(value & 0xFFFF) as u16, (value >> 16) as u16]
}

/// Decode an unsigned doubleword, least-significant word first
pub fn decode_u32(registers: &[u16]) -> Result<u32> {
    if registers.len() < 2 {
        return Err(GridconError::protocol(
            "Insufficient registers for unsigned doubleword",
        ));
    }
    Ok((u32::from(registers[1]) << 16) | u32::from(registers[0]))
}

/// Encode an IEEE-754 float doubleword, least-significant word first
pub fn encode_f32(value: f32) -> [u16; 2] {
    encode_u32(value.to_bits())
}

/// Decode an IEEE-754 float doubleword, least-significant word first
pub fn decode_f32(registers: &[u16]) -> Result<f32> {
    Ok(f32::from_bits(decode_u32(registers)?))
}

/// Extract a single flag from a bit-decomposed doubleword
pub fn bit(word: u32, position: u8) -> bool {
    (word >> position) & 1 == 1
}

/// Extract one byte from a byte-decomposed doubleword (0 = least significant)
pub fn byte(word: u32, index: u8) -> u8 {
    ((word >> (8 * u32::from(index))) & 0xFF) as u8
}

/// Encode the hardware clock date field: day-of-month, weekday (Monday = 0),
/// years since 2000 and month packed into one doubleword, LSB first.
pub fn encode_sync_date(now: &DateTime<Utc>) -> u32 {
    let day = now.day() & 0xFF;
    let weekday = now.weekday().num_days_from_monday() & 0xFF;
    let year = (now.year() - 2000).clamp(0, 255) as u32;
    let month = now.month() & 0xFF;
    day | (weekday << 8) | (year << 16) | (month << 24)
}

/// Encode the hardware clock time field: seconds, an unused byte, hours and
/// minutes packed into one doubleword, LSB first.
pub fn encode_sync_time(now: &DateTime<Utc>) -> u32 {
    let seconds = now.second() & 0xFF;
    let hours = now.hour() & 0xFF;
    let minutes = now.minute() & 0xFF;
    seconds | (hours << 16) | (minutes << 24)
}

/// Decoded high-priority CCU status block
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CcuStatus {
    /// Raw state flag word; interpreted by [`crate::ccu`]
    pub state_bits: u32,
    pub error_code: u32,
    pub voltage_u12: f32,
    pub voltage_u23: f32,
    pub voltage_u31: f32,
    pub current_il1: f32,
    pub current_il2: f32,
    pub current_il3: f32,
    pub power_p: f32,
    pub power_q: f32,
    /// Per-unit converter frequency
    pub frequency: f32,
}

impl CcuStatus {
    /// Decode from the 22-register high-priority block
    pub fn from_registers(registers: &[u16]) -> Result<Self> {
        if registers.len() < CCU_STATUS_BLOCK.count as usize {
            return Err(GridconError::protocol("Short CCU status block"));
        }
        Ok(Self {
            state_bits: decode_u32(&registers[0..2])?,
            error_code: decode_u32(&registers[2..4])?,
            voltage_u12: decode_f32(&registers[4..6])?,
            voltage_u23: decode_f32(&registers[6..8])?,
            voltage_u31: decode_f32(&registers[8..10])?,
            current_il1: decode_f32(&registers[10..12])?,
            current_il2: decode_f32(&registers[12..14])?,
            current_il3: decode_f32(&registers[14..16])?,
            power_p: decode_f32(&registers[16..18])?,
            power_q: decode_f32(&registers[18..20])?,
            frequency: decode_f32(&registers[20..22])?,
        })
    }
}

/// Decoded per-IPU status block
#[derive(Debug, Clone, Copy, Default)]
pub struct IpuStatus {
    /// State machine byte (byte 0 of the status word)
    pub state_machine: u8,
    /// MCU status byte (byte 1 of the status word)
    pub mcu: u8,
    pub filter_current: f32,
    pub dc_link_positive_voltage: f32,
    pub dc_link_negative_voltage: f32,
    pub dc_link_current: f32,
    pub dc_link_active_power: f32,
    pub dc_link_utilization: f32,
    pub fan_speed_max: u32,
    pub fan_speed_min: u32,
    pub temperature_igbt_max: f32,
    pub temperature_mcu_board: f32,
    pub temperature_grid_choke: f32,
    pub temperature_inverter_choke: f32,
    pub reserve_1: f32,
    pub reserve_2: f32,
    pub reserve_3: f32,
}

impl IpuStatus {
    /// Decode from a 32-register IPU status block
    pub fn from_registers(registers: &[u16]) -> Result<Self> {
        if registers.len() < 32 {
            return Err(GridconError::protocol("Short IPU status block"));
        }
        let status_word = decode_u32(&registers[0..2])?;
        Ok(Self {
            state_machine: byte(status_word, 0),
            mcu: byte(status_word, 1),
            filter_current: decode_f32(&registers[2..4])?,
            dc_link_positive_voltage: decode_f32(&registers[4..6])?,
            dc_link_negative_voltage: decode_f32(&registers[6..8])?,
            dc_link_current: decode_f32(&registers[8..10])?,
            dc_link_active_power: decode_f32(&registers[10..12])?,
            dc_link_utilization: decode_f32(&registers[12..14])?,
            fan_speed_max: decode_u32(&registers[14..16])?,
            fan_speed_min: decode_u32(&registers[16..18])?,
            temperature_igbt_max: decode_f32(&registers[18..20])?,
            temperature_mcu_board: decode_f32(&registers[20..22])?,
            temperature_grid_choke: decode_f32(&registers[22..24])?,
            temperature_inverter_choke: decode_f32(&registers[24..26])?,
            reserve_1: decode_f32(&registers[26..28])?,
            reserve_2: decode_f32(&registers[28..30])?,
            reserve_3: decode_f32(&registers[30..32])?,
        })
    }
}

/// Decoded per-IPU DC/DC string measurement block
#[derive(Debug, Clone, Copy, Default)]
pub struct DcdcMeasurements {
    pub voltage_string_a: f32,
    pub voltage_string_b: f32,
    pub voltage_string_c: f32,
    pub current_string_a: f32,
    pub current_string_b: f32,
    pub current_string_c: f32,
    pub power_string_a: f32,
    pub power_string_b: f32,
    pub power_string_c: f32,
    pub utilization_string_a: f32,
    pub utilization_string_b: f32,
    pub utilization_string_c: f32,
    pub accumulated_sum_dc_current: f32,
    pub accumulated_dc_utilization: f32,
    pub reserve_1: f32,
    pub reserve_2: f32,
}

impl DcdcMeasurements {
    /// Decode from a 32-register DC/DC measurement block
    pub fn from_registers(registers: &[u16]) -> Result<Self> {
        if registers.len() < 32 {
            return Err(GridconError::protocol("Short DC/DC measurement block"));
        }
        let mut values = [0.0f32; 16];
        for (i, value) in values.iter_mut().enumerate() {
            *value = decode_f32(&registers[2 * i..2 * i + 2])?;
        }
        Ok(Self {
            voltage_string_a: values[0],
            voltage_string_b: values[1],
            voltage_string_c: values[2],
            current_string_a: values[3],
            current_string_b: values[4],
            current_string_c: values[5],
            power_string_a: values[6],
            power_string_b: values[7],
            power_string_c: values[8],
            utilization_string_a: values[9],
            utilization_string_b: values[10],
            utilization_string_c: values[11],
            accumulated_sum_dc_current: values[12],
            accumulated_dc_utilization: values[13],
            reserve_1: values[14],
            reserve_2: values[15],
        })
    }
}

/// Decoded command mirror block (diagnostic read-back of the last accepted
/// command)
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandMirror {
    pub control_word: u32,
    pub error_code_feedback: u32,
    pub u0: f32,
    pub f0: f32,
    pub q_ref: f32,
    pub p_ref: f32,
}

impl CommandMirror {
    /// Decode from the 12-register mirror block
    pub fn from_registers(registers: &[u16]) -> Result<Self> {
        if registers.len() < COMMAND_MIRROR_BLOCK.count as usize {
            return Err(GridconError::protocol("Short command mirror block"));
        }
        Ok(Self {
            control_word: decode_u32(&registers[0..2])?,
            error_code_feedback: decode_u32(&registers[2..4])?,
            u0: decode_f32(&registers[4..6])?,
            f0: decode_f32(&registers[6..8])?,
            q_ref: decode_f32(&registers[8..10])?,
            p_ref: decode_f32(&registers[10..12])?,
        })
    }
}

/// Command write block at 32560
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandBlock {
    pub control_word: u32,
    pub error_code_feedback: u32,
    /// Voltage reference, per-unit. Must never be written as zero on a live
    /// converter: the hardware regulates toward the reference.
    pub u0: f32,
    /// Frequency reference, per-unit. Same zero-write hazard as `u0`.
    pub f0: f32,
    pub q_ref: f32,
    pub p_ref: f32,
    pub sync_date: u32,
    pub sync_time: u32,
}

impl CommandBlock {
    pub const START: u16 = 32560;

    /// Serialize the full block; all eight fields, every time
    pub fn to_registers(&self) -> [u16; 16] {
        let mut out = [0u16; 16];
        let words = [
            encode_u32(self.control_word),
            encode_u32(self.error_code_feedback),
            encode_f32(self.u0),
            encode_f32(self.f0),
            encode_f32(self.q_ref),
            encode_f32(self.p_ref),
            encode_u32(self.sync_date),
            encode_u32(self.sync_time),
        ];
        for (i, pair) in words.iter().enumerate() {
            out[2 * i] = pair[0];
            out[2 * i + 1] = pair[1];
        }
        out
    }
}

/// Field-by-field dump of the serialized block, decoded back through the
/// register map. Diagnostic logging only.
impl std::fmt::Display for CommandBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let regs = self.to_registers();
        for (i, field) in COMMAND_FIELDS.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            let offset = usize::from(field.address - Self::START);
            let pair = &regs[offset..offset + 2];
            match field.encoding {
                Encoding::Unsigned => {
                    write!(f, "{}=0x{:08X}", field.name, decode_u32(pair).unwrap_or(0))?;
                }
                Encoding::Float => {
                    write!(f, "{}={:.4}", field.name, decode_f32(pair).unwrap_or(0.0))?;
                }
            }
        }
        Ok(())
    }
}

impl Default for CommandBlock {
    fn default() -> Self {
        Self {
            control_word: 0,
            error_code_feedback: 0,
            u0: NOMINAL_REFERENCE,
            f0: NOMINAL_REFERENCE,
            q_ref: 0.0,
            p_ref: 0.0,
            sync_date: 0,
            sync_time: 0,
        }
    }
}

/// Active power control mode selector for the CCU parameter block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PControlMode {
    Disabled,
    ActivePowerControl,
    PowerLimiter,
}

impl PControlMode {
    /// The register is a float; the mode codes are small float constants
    pub fn as_f32(self) -> f32 {
        match self {
            PControlMode::Disabled => 0.0,
            PControlMode::ActivePowerControl => 1.0,
            PControlMode::PowerLimiter => 2.0,
        }
    }
}

/// CCU control parameter block at 32592 (droop, dead band, limits, mode)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CcuParameters {
    pub u_q_droop_main: f32,
    pub u_q_droop_t1_main: f32,
    pub f_p_droop_main: f32,
    pub f_p_droop_t1_main: f32,
    pub q_u_droop_main: f32,
    pub q_u_dead_band: f32,
    pub q_limit: f32,
    pub p_f_droop_main: f32,
    pub p_f_dead_band: f32,
    pub p_u_droop: f32,
    pub p_u_dead_band: f32,
    pub p_u_max_charge: f32,
    pub p_u_max_discharge: f32,
    pub p_control_mode: f32,
    pub p_control_lim_two: f32,
    pub p_control_lim_one: f32,
}

impl CcuParameters {
    pub const START: u16 = 32592;

    /// Baseline for on-grid operation: every coefficient zero except the
    /// power control mode selector
    pub fn baseline(mode: PControlMode) -> Self {
        Self {
            p_control_mode: mode.as_f32(),
            ..Self::default()
        }
    }

    pub fn to_registers(&self) -> [u16; 32] {
        let values = [
            self.u_q_droop_main,
            self.u_q_droop_t1_main,
            self.f_p_droop_main,
            self.f_p_droop_t1_main,
            self.q_u_droop_main,
            self.q_u_dead_band,
            self.q_limit,
            self.p_f_droop_main,
            self.p_f_dead_band,
            self.p_u_droop,
            self.p_u_dead_band,
            self.p_u_max_charge,
            self.p_u_max_discharge,
            self.p_control_mode,
            self.p_control_lim_two,
            self.p_control_lim_one,
        ];
        pack_floats(&values)
    }
}

/// Parameter block for one AC inverter unit (IPU 1-3)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AcIpuParameters {
    pub dc_voltage_setpoint: f32,
    pub dc_current_setpoint: f32,
    pub u0_offset: f32,
    pub f0_offset: f32,
    pub q_ref_offset: f32,
    pub p_ref_offset: f32,
    /// Transmitted negative per hardware convention
    pub p_max_discharge: f32,
    /// Transmitted positive per hardware convention
    pub p_max_charge: f32,
}

/// Write block start addresses for the three AC inverter units
pub const AC_IPU_PARAMETER_STARTS: [u16; 3] = [32624, 32656, 32688];

impl AcIpuParameters {
    pub fn to_registers(&self) -> [u16; 16] {
        let values = [
            self.dc_voltage_setpoint,
            self.dc_current_setpoint,
            self.u0_offset,
            self.f0_offset,
            self.q_ref_offset,
            self.p_ref_offset,
            self.p_max_discharge,
            self.p_max_charge,
        ];
        pack_floats(&values)
    }
}

/// Parameter block for the DC/DC string combiner (IPU 4) at 32720
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DcdcParameters {
    pub dc_voltage_setpoint: f32,
    pub weight_string_a: f32,
    pub weight_string_b: f32,
    pub weight_string_c: f32,
    pub i_ref_string_a: f32,
    pub i_ref_string_b: f32,
    pub i_ref_string_c: f32,
    pub string_control_mode: f32,
}

impl DcdcParameters {
    pub const START: u16 = 32720;

    pub fn to_registers(&self) -> [u16; 16] {
        let values = [
            self.dc_voltage_setpoint,
            self.weight_string_a,
            self.weight_string_b,
            self.weight_string_c,
            self.i_ref_string_a,
            self.i_ref_string_b,
            self.i_ref_string_c,
            self.string_control_mode,
        ];
        pack_floats(&values)
    }
}

fn pack_floats<const N: usize>(values: &[f32]) -> [u16; N] {
    let mut out = [0u16; N];
    for (i, value) in values.iter().enumerate() {
        let pair = encode_f32(*value);
        out[2 * i] = pair[0];
        out[2 * i + 1] = pair[1];
    }
    out
}

/// The complete outbound image, flushed block-by-block every tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WriteImage {
    pub command: CommandBlock,
    pub ccu_parameters: CcuParameters,
    pub ac_ipu: [AcIpuParameters; 3],
    pub dcdc: DcdcParameters,
}

impl WriteImage {
    /// Serialize every write block as (start address, registers)
    pub fn blocks(&self) -> Vec<(u16, Vec<u16>)> {
        let mut blocks = Vec::with_capacity(6);
        blocks.push((CommandBlock::START, self.command.to_registers().to_vec()));
        blocks.push((
            CcuParameters::START,
            self.ccu_parameters.to_registers().to_vec(),
        ));
        for (params, start) in self.ac_ipu.iter().zip(AC_IPU_PARAMETER_STARTS) {
            blocks.push((start, params.to_registers().to_vec()));
        }
        blocks.push((DcdcParameters::START, self.dcdc.to_registers().to_vec()));
        blocks
    }
}
