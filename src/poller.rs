use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, error};

use crate::bridge::{BridgeError, StateBridge};
use crate::config::Config;
use crate::homewizard::{DeviceReading, FetchError, HomeWizardAPI};
use crate::state_tree::{BusPath, Phase, PhaseQuantity};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("publishing failed: {0}")]
    Bridge(#[from] BridgeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published,
    /// The device could not be read, power was zeroed
    PowerZeroed,
}

/// Reads the meter and maps the reading onto the bus, one cycle per call
pub struct Poller {
    config: Config,
    device: HomeWizardAPI,
    last_update: Option<DateTime<Local>>,
}

impl Poller {
    pub fn new(config: Config, device: HomeWizardAPI) -> Self {
        Self {
            config,
            device,
            last_update: None,
        }
    }

    /// Wall-clock time of the last cycle, successful or not
    pub fn last_update(&self) -> Option<DateTime<Local>> {
        self.last_update
    }

    /// Runs one cycle. Device failures are absorbed here by zeroing the
    /// instantaneous power; the update index advances whatever happens.
    pub async fn poll_once(&mut self, bridge: &mut StateBridge) -> Result<CycleOutcome, CycleError> {
        let outcome = match self.publish_reading(bridge).await {
            Ok(()) => Ok(CycleOutcome::Published),
            Err(CycleError::Fetch(e)) => {
                if e.is_unsupported_config() {
                    error!("Unsupported configuration, cannot reach HomeWizard. Setting power values to 0. Details: {e}");
                } else {
                    error!(
                        "Error getting data from HomeWizard - check network or HomeWizard status. Setting power values to 0. Details: {e}"
                    );
                }
                zero_power(bridge)
                    .map(|()| CycleOutcome::PowerZeroed)
                    .map_err(CycleError::from)
            }
            Err(e) => Err(e),
        };

        bridge.advance_update_index();
        self.last_update = Some(Local::now());
        outcome
    }

    async fn publish_reading(&self, bridge: &mut StateBridge) -> Result<(), CycleError> {
        let url = self.config.status_url()?;
        let document = self.device.read_document(&url).await?;
        let reading = DeviceReading::from_document(document)?;

        for phase in Phase::ALL {
            if phase == self.config.phase {
                bridge.set(
                    BusPath::Ac(phase, PhaseQuantity::Voltage),
                    reading.active_voltage,
                )?;
                bridge.set(
                    BusPath::Ac(phase, PhaseQuantity::Current),
                    reading.active_current,
                )?;
                bridge.set(BusPath::Ac(phase, PhaseQuantity::Power), reading.active_power)?;
            } else {
                for quantity in PhaseQuantity::ALL {
                    bridge.set(BusPath::Ac(phase, quantity), 0.0)?;
                }
            }
        }

        bridge.set(BusPath::AcPower, reading.active_power)?;
        bridge.set(BusPath::AcEnergyForward, reading.total_import_kwh)?;
        bridge.set(BusPath::AcEnergyReverse, reading.total_export_kwh)?;

        debug!("House Consumption (/Ac/Power): {}", reading.active_power);
        debug!("House Forward (/Ac/Energy/Forward): {}", reading.total_import_kwh);
        debug!("House Reverse (/Ac/Energy/Reverse): {}", reading.total_export_kwh);
        Ok(())
    }
}

/// Drops every power value to zero. Energy counters keep their last values.
fn zero_power(bridge: &mut StateBridge) -> Result<(), BridgeError> {
    for phase in Phase::ALL {
        bridge.set(BusPath::Ac(phase, PhaseQuantity::Power), 0.0)?;
    }
    bridge.set(BusPath::AcPower, 0.0)
}
