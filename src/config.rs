//! Configuration management for the gridcon driver
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{GridconError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Modbus TCP connection configuration
    pub modbus: ModbusConfig,

    /// Digital input channel addresses
    pub digital_inputs: DigitalInputsConfig,

    /// Converter power ratings
    pub ratings: RatingsConfig,

    /// Grid synchronization configuration
    pub sync: SyncConfig,

    /// Fault handling configuration
    pub faults: FaultsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Polling interval in milliseconds (one control tick per poll)
    pub poll_interval_ms: u64,

    /// Low-priority register blocks are refreshed every Nth poll cycle
    pub low_priority_divisor: u32,
}

/// Modbus TCP connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// IP address of the converter CCU
    pub ip: String,

    /// TCP port (typically 502)
    pub port: u16,

    /// Modbus unit identifier of the converter
    pub unit_id: u8,
}

/// Digital input channel addresses on the station I/O module
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DigitalInputsConfig {
    /// Bridge contactor status line
    pub bridge_contactor: u16,

    /// Main switch position line
    pub main_switch: u16,

    /// Grid disconnect switch line; when unset the station is assumed
    /// on-grid
    pub disconnect_switch: Option<u16>,
}

/// Converter power ratings in watts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingsConfig {
    /// Rated apparent power of the full converter
    pub rated_power_w: f32,

    /// Maximum charge power per AC inverter unit
    pub max_charge_w: f32,

    /// Maximum discharge power per AC inverter unit
    pub max_discharge_w: f32,
}

/// Grid synchronization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds to wait for the main switch before falling back to nominal
    /// references
    pub reconnect_timeout_secs: u64,
}

/// Fault handling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultsConfig {
    /// Minimum seconds between acknowledge pulses
    pub acknowledge_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    #[serde(default = "default_true")]
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.0.10".to_string(),
            port: 502,
            unit_id: 0,
        }
    }
}

impl Default for RatingsConfig {
    fn default() -> Self {
        Self {
            rated_power_w: 125_000.0,
            max_charge_w: 86_000.0,
            max_discharge_w: 86_000.0,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_timeout_secs: 600,
        }
    }
}

impl Default for FaultsConfig {
    fn default() -> Self {
        Self {
            acknowledge_interval_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/gridcon.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modbus: ModbusConfig::default(),
            digital_inputs: DigitalInputsConfig::default(),
            ratings: RatingsConfig::default(),
            sync: SyncConfig::default(),
            faults: FaultsConfig::default(),
            logging: LoggingConfig::default(),
            poll_interval_ms: 1000,
            low_priority_divisor: 10,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "gridcon_config.yaml",
            "/data/gridcon_config.yaml",
            "/etc/gridcon/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.modbus.ip.is_empty() {
            return Err(GridconError::validation(
                "modbus.ip",
                "IP address cannot be empty",
            ));
        }

        if self.modbus.port == 0 {
            return Err(GridconError::validation(
                "modbus.port",
                "Port must be greater than 0",
            ));
        }

        if self.ratings.rated_power_w <= 0.0 {
            return Err(GridconError::validation(
                "ratings.rated_power_w",
                "Must be positive",
            ));
        }

        if self.ratings.max_charge_w <= 0.0 || self.ratings.max_discharge_w <= 0.0 {
            return Err(GridconError::validation(
                "ratings.max_charge_w",
                "Charge and discharge limits must be positive",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(GridconError::validation(
                "poll_interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.low_priority_divisor == 0 {
            return Err(GridconError::validation(
                "low_priority_divisor",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.modbus.port, 502);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.ratings.rated_power_w, 125_000.0);
        assert_eq!(config.sync.reconnect_timeout_secs, 600);
        assert_eq!(config.faults.acknowledge_interval_secs, 5);
        assert!(config.digital_inputs.disconnect_switch.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        // Test invalid IP
        config.modbus.ip = String::new();
        assert!(config.validate().is_err());

        // Reset and test invalid rated power
        config = Config::default();
        config.ratings.rated_power_w = 0.0;
        assert!(config.validate().is_err());

        // Reset and test invalid divisor
        config = Config::default();
        config.low_priority_divisor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.modbus.port, deserialized.modbus.port);
        assert_eq!(
            config.ratings.max_charge_w,
            deserialized.ratings.max_charge_w
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "modbus:\n  ip: 10.0.0.5\n  port: 502\n  unit_id: 3\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.modbus.ip, "10.0.0.5");
        assert_eq!(config.modbus.unit_id, 3);
        assert_eq!(config.poll_interval_ms, 1000);
    }
}
