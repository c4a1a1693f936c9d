//! Error types and handling for the gridcon driver
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for gridcon operations
pub type Result<T> = std::result::Result<T, GridconError>;

/// Main error type for the gridcon driver
#[derive(Debug, Error)]
pub enum GridconError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Modbus communication errors
    #[error("Modbus error: {message}")]
    Modbus { message: String },

    /// Register protocol errors (encoding, block layout)
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl GridconError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        GridconError::Config {
            message: message.into(),
        }
    }

    /// Create a new Modbus error
    pub fn modbus<S: Into<String>>(message: S) -> Self {
        GridconError::Modbus {
            message: message.into(),
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        GridconError::Protocol {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        GridconError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        GridconError::Io {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        GridconError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        GridconError::Generic {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for GridconError {
    fn from(err: std::io::Error) -> Self {
        GridconError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for GridconError {
    fn from(err: serde_yaml::Error) -> Self {
        GridconError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GridconError {
    fn from(err: serde_json::Error) -> Self {
        GridconError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GridconError::config("test config error");
        assert!(matches!(err, GridconError::Config { .. }));

        let err = GridconError::modbus("test modbus error");
        assert!(matches!(err, GridconError::Modbus { .. }));

        let err = GridconError::validation("field", "test validation error");
        assert!(matches!(err, GridconError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = GridconError::config("test error");
        assert_eq!(format!("{}", err), "Configuration error: test error");

        let err = GridconError::validation("modbus.unit_id", "invalid value");
        assert_eq!(
            format!("{}", err),
            "Validation error: modbus.unit_id - invalid value"
        );
    }
}
