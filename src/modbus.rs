//! Modbus TCP client for the converter CCU
//!
//! This module provides async Modbus TCP communication with the converter
//! control unit, with timeouts on every operation and a connection manager
//! that reconnects and retries around transient link failures.

use crate::config::ModbusConfig;
use crate::error::{GridconError, Result};
use crate::logging::get_logger;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

/// Modbus TCP client for CCU communication
pub struct ModbusClient {
    /// Modbus TCP client connection
    client: Option<tokio_modbus::client::Context>,

    /// Configuration
    config: ModbusConfig,

    /// Connection timeout
    connection_timeout: Duration,

    /// Operation timeout
    operation_timeout: Duration,

    /// Logger
    logger: crate::logging::StructuredLogger,
}

impl ModbusClient {
    /// Create a new Modbus client
    pub fn new(config: &ModbusConfig) -> Self {
        let logger = get_logger("modbus");
        Self {
            client: None,
            config: config.clone(),
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(2),
            logger,
        }
    }

    /// Connect to the CCU
    pub async fn connect(&mut self) -> Result<()> {
        let address = format!("{}:{}", self.config.ip, self.config.port);

        self.logger
            .info(&format!("Connecting to converter CCU at {}", address));

        let socket_addr: std::net::SocketAddr = address
            .parse()
            .map_err(|e| GridconError::modbus(format!("Invalid socket address: {}", e)))?;

        let slave = Slave(self.config.unit_id);
        match timeout(self.connection_timeout, tcp::connect_slave(socket_addr, slave)).await {
            Ok(Ok(client)) => {
                self.client = Some(client);
                self.logger.info("Successfully connected to converter CCU");
                Ok(())
            }
            Ok(Err(e)) => {
                let error_msg = format!("Failed to connect to converter CCU: {}", e);
                self.logger.error(&error_msg);
                Err(GridconError::modbus(error_msg))
            }
            Err(_) => {
                let error_msg = "Connection timeout".to_string();
                self.logger.error(&error_msg);
                Err(GridconError::timeout(error_msg))
            }
        }
    }

    /// Disconnect from the CCU
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(_client) = self.client.take() {
            self.logger.info("Disconnecting from converter CCU");
            // The client will be dropped automatically
        }
        Ok(())
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Read holding registers
    pub async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let timeout_duration = self.operation_timeout;

        // Log before borrowing client
        self.logger.debug(&format!(
            "Reading {} registers from address {}",
            count, address
        ));

        let client = self.get_client()?;
        let request = client.read_holding_registers(address, count);

        match timeout(timeout_duration, request).await {
            Ok(Ok(Ok(response))) => {
                self.logger
                    .trace(&format!("Read {} registers: {:?}", response.len(), response));
                Ok(response)
            }
            Ok(Ok(Err(exception))) => {
                let error_msg = format!("CCU rejected read at {}: {}", address, exception);
                self.logger.error(&error_msg);
                Err(GridconError::modbus(error_msg))
            }
            Ok(Err(e)) => {
                let error_msg = format!("Failed to read holding registers: {}", e);
                self.logger.error(&error_msg);
                Err(GridconError::modbus(error_msg))
            }
            Err(_) => {
                let error_msg = "Read operation timeout".to_string();
                self.logger.error(&error_msg);
                Err(GridconError::timeout(error_msg))
            }
        }
    }

    /// Write multiple registers
    pub async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let timeout_duration = self.operation_timeout;

        // Log before borrowing client
        self.logger.debug(&format!(
            "Writing {} values to registers starting at {}",
            values.len(),
            address
        ));

        let client = self.get_client()?;
        let request = client.write_multiple_registers(address, values);

        match timeout(timeout_duration, request).await {
            Ok(Ok(Ok(()))) => {
                self.logger.debug("Successfully wrote multiple registers");
                Ok(())
            }
            Ok(Ok(Err(exception))) => {
                let error_msg = format!("CCU rejected write at {}: {}", address, exception);
                self.logger.error(&error_msg);
                Err(GridconError::modbus(error_msg))
            }
            Ok(Err(e)) => {
                let error_msg = format!("Failed to write multiple registers: {}", e);
                self.logger.error(&error_msg);
                Err(GridconError::modbus(error_msg))
            }
            Err(_) => {
                let error_msg = "Write operation timeout".to_string();
                self.logger.error(&error_msg);
                Err(GridconError::timeout(error_msg))
            }
        }
    }

    /// Get client reference or error if not connected
    fn get_client(&mut self) -> Result<&mut tokio_modbus::client::Context> {
        self.client
            .as_mut()
            .ok_or_else(|| GridconError::modbus("Not connected to converter CCU"))
    }
}

/// Connection manager with automatic reconnection
pub struct ModbusConnectionManager {
    client: ModbusClient,
    max_retry_attempts: u32,
    retry_delay: Duration,
    logger: crate::logging::StructuredLogger,
}

impl ModbusConnectionManager {
    /// Create a new connection manager
    pub fn new(config: &ModbusConfig, max_retry_attempts: u32, retry_delay: Duration) -> Self {
        let logger = get_logger("modbus_manager");
        Self {
            client: ModbusClient::new(config),
            max_retry_attempts,
            retry_delay,
            logger,
        }
    }

    /// Read holding registers, reconnecting and retrying on link failures
    pub async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let mut attempts = 0;
        loop {
            self.ensure_connected(&mut attempts).await?;
            match self.client.read_holding_registers(address, count).await {
                Ok(response) => return Ok(response),
                Err(e) => self.handle_failure(e, &mut attempts).await?,
            }
        }
    }

    /// Write multiple registers, reconnecting and retrying on link failures
    pub async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<()> {
        let mut attempts = 0;
        loop {
            self.ensure_connected(&mut attempts).await?;
            match self.client.write_multiple_registers(address, values).await {
                Ok(()) => return Ok(()),
                Err(e) => self.handle_failure(e, &mut attempts).await?,
            }
        }
    }

    async fn ensure_connected(&mut self, attempts: &mut u32) -> Result<()> {
        while !self.client.is_connected() {
            if let Err(e) = self.client.connect().await {
                *attempts += 1;
                if *attempts >= self.max_retry_attempts {
                    return Err(e);
                }
                self.logger
                    .warn(&format!("Connection attempt {} failed: {}", attempts, e));
                sleep(self.retry_delay).await;
            }
        }
        Ok(())
    }

    /// Classify the failure; connection errors trigger a reconnect cycle,
    /// everything else surfaces immediately
    async fn handle_failure(&mut self, error: GridconError, attempts: &mut u32) -> Result<()> {
        if !Self::is_connection_error(&error) {
            return Err(error);
        }
        self.logger
            .warn(&format!("Operation failed due to connection error: {}", error));
        self.client.disconnect().await.ok(); // Ignore disconnect errors
        *attempts += 1;
        if *attempts >= self.max_retry_attempts {
            return Err(error);
        }
        sleep(self.retry_delay).await;
        Ok(())
    }

    /// Check if an error is a connection-related error
    fn is_connection_error(error: &GridconError) -> bool {
        match error {
            GridconError::Modbus { message: msg } => {
                msg.contains("connection")
                    || msg.contains("Connection")
                    || msg.contains("timeout")
                    || msg.contains("disconnected")
            }
            GridconError::Timeout { message: _ } => true,
            _ => false,
        }
    }
}
