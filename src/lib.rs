//! # Gridcon - Battery Power-Conversion Station Driver
//!
//! A Rust driver for the MR Gridcon PCS, a grid-tied battery power
//! converter built from three AC inverter units and a DC/DC string
//! combiner behind one central control unit (CCU). The driver speaks
//! Modbus TCP to the CCU, interprets its state machine, sequences start,
//! run and fault-recovery commands, and distributes site power requests
//! across the inverter units and battery strings.
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation of concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `modbus`: Modbus TCP client for CCU communication
//! - `registers`: Register map, doubleword codecs and write blocks
//! - `ccu`: CCU state interpretation and control word construction
//! - `sequencer`: Per-tick command sequencing
//! - `allocation`: Power allocation across units and strings
//! - `sync`: Off-grid synchronization toward the utility grid
//! - `faults`: Rate-limited fault acknowledgement
//! - `devices`: Battery, grid meter and digital input interfaces
//! - `driver`: Core poll loop and state management

pub mod allocation;
pub mod ccu;
pub mod config;
pub mod devices;
pub mod driver;
pub mod error;
pub mod faults;
pub mod logging;
pub mod modbus;
pub mod registers;
pub mod sequencer;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use driver::GridconDriver;
pub use error::{GridconError, Result};
