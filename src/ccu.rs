//! CCU state interpretation and control word construction
//!
//! The converter reports its state machine as a bit field where several
//! flags can be asserted at once during transitions. Interpretation walks
//! a fixed priority table and takes the first asserted flag; an all-zero
//! word means the CCU has not reported anything usable yet.

use crate::registers::bit;
use std::fmt;

/// Interpreted CCU state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CcuState {
    #[default]
    Undefined,
    Idle,
    Precharge,
    StopPrecharge,
    Ready,
    Pause,
    Run,
    Error,
    VoltageRampingUp,
    Overload,
    ShortCircuitDetected,
    DeratingPower,
    DeratingHarmonics,
    SiaActive,
}

/// Flag-bit to state mapping in priority order; the first asserted bit wins
const STATE_TABLE: [(u8, CcuState); 13] = [
    (0, CcuState::Idle),
    (1, CcuState::Precharge),
    (2, CcuState::StopPrecharge),
    (3, CcuState::Ready),
    (4, CcuState::Pause),
    (5, CcuState::Run),
    (6, CcuState::Error),
    (7, CcuState::VoltageRampingUp),
    (8, CcuState::Overload),
    (9, CcuState::ShortCircuitDetected),
    (10, CcuState::DeratingPower),
    (11, CcuState::DeratingHarmonics),
    (12, CcuState::SiaActive),
];

impl CcuState {
    /// Interpret the raw state flag word
    pub fn from_bits(word: u32) -> Self {
        for (position, state) in STATE_TABLE {
            if bit(word, position) {
                return state;
            }
        }
        CcuState::Undefined
    }

    /// Whether the converter is producing or ready to produce power
    pub fn is_running(self) -> bool {
        self == CcuState::Run
    }

    /// Whether the converter needs an error acknowledge cycle
    pub fn is_error(self) -> bool {
        self == CcuState::Error
    }
}

impl fmt::Display for CcuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CcuState::Undefined => "UNDEFINED",
            CcuState::Idle => "IDLE",
            CcuState::Precharge => "PRECHARGE",
            CcuState::StopPrecharge => "STOP_PRECHARGE",
            CcuState::Ready => "READY",
            CcuState::Pause => "PAUSE",
            CcuState::Run => "RUN",
            CcuState::Error => "ERROR",
            CcuState::VoltageRampingUp => "VOLTAGE_RAMPING_UP",
            CcuState::Overload => "OVERLOAD",
            CcuState::ShortCircuitDetected => "SHORT_CIRCUIT_DETECTED",
            CcuState::DeratingPower => "DERATING_POWER",
            CcuState::DeratingHarmonics => "DERATING_HARMONICS",
            CcuState::SiaActive => "SIA_ACTIVE",
        };
        f.write_str(name)
    }
}

/// Bit positions of the outbound control word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlFlag {
    Play = 0,
    Ready = 1,
    Acknowledge = 2,
    Stop = 3,
    BlackstartApproval = 4,
    SyncApproval = 5,
    ShortCircuitHandling = 6,
    /// Set = voltage control, clear = current control
    ModeSelection = 7,
    DisableIpu4 = 28,
    DisableIpu3 = 29,
    DisableIpu2 = 30,
    DisableIpu1 = 31,
}

/// Builder for the 32-bit control word. Each tick starts from zero and
/// composes exactly the flags the sequencer decides on; nothing is carried
/// over from the previous cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlWord(u32);

impl ControlWord {
    pub fn new() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn with(mut self, flag: ControlFlag) -> Self {
        self.0 |= 1 << (flag as u8);
        self
    }

    #[must_use]
    pub fn with_if(self, flag: ControlFlag, condition: bool) -> Self {
        if condition { self.with(flag) } else { self }
    }

    pub fn contains(self, flag: ControlFlag) -> bool {
        bit(self.0, flag as u8)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}
