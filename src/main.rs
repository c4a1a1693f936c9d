use anyhow::Result;
use async_trait::async_trait;
use gridcon::config::Config;
use gridcon::devices::{Battery, BatteryLimits, DigitalInputs, GridMeter, MeterReading};
use gridcon::driver::{DriverCommand, GridconDriver};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Placeholder battery until the site bus integration is wired in: reports
/// offline so the allocation engine assigns it no weight.
struct UnwiredBattery;

#[async_trait]
impl Battery for UnwiredBattery {
    async fn is_available(&self) -> bool {
        false
    }

    async fn limits(&self) -> BatteryLimits {
        BatteryLimits::default()
    }
}

/// Placeholder meter; off-grid synchronization holds nominal references
/// until a real meter is attached.
struct UnwiredMeter;

#[async_trait]
impl GridMeter for UnwiredMeter {
    async fn reading(&self) -> Option<MeterReading> {
        None
    }
}

/// Placeholder digital inputs: assume on-grid with everything closed.
struct UnwiredInputs;

#[async_trait]
impl DigitalInputs for UnwiredInputs {
    async fn bridge_contactor(&self) -> bool {
        true
    }

    async fn main_switch(&self) -> bool {
        true
    }

    async fn disconnect_switch(&self) -> Option<bool> {
        None
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Create driver command channel
    let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel::<DriverCommand>();

    let batteries: Vec<Arc<dyn Battery>> = vec![
        Arc::new(UnwiredBattery),
        Arc::new(UnwiredBattery),
        Arc::new(UnwiredBattery),
    ];

    let mut driver = GridconDriver::new(
        config,
        batteries,
        Arc::new(UnwiredMeter),
        Arc::new(UnwiredInputs),
        cmd_rx,
    )
    .map_err(|e| anyhow::anyhow!("Failed to create driver: {}", e))?;

    info!("Gridcon station driver starting up");

    // Stop the converter cleanly on Ctrl-C
    let shutdown = driver.shutdown_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(());
        }
    });

    match driver.run().await {
        Ok(()) => {
            info!("Driver shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Driver failed with error: {}", e);
            Err(anyhow::anyhow!("Driver error: {}", e))
        }
    }
}
