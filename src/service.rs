use tokio::sync::mpsc::{self, Receiver};
use tracing::{error, info};

use crate::bridge::{BusHandle, BusRequest, StartupError, StateBridge};
use crate::config::Config;
use crate::homewizard::HomeWizardAPI;
use crate::poller::{Poller, POLL_INTERVAL};
use crate::scheduler::{keep_running, Schedule};
use crate::sign_of_life;

/// Owns the published state and every timer that touches it.
///
/// Polls, sign-of-life reports and bus requests all run on the one loop in
/// [`MeterService::run`], so the state is never shared or locked.
pub struct MeterService {
    bridge: StateBridge,
    poller: Poller,
    poll_schedule: Schedule,
    sign_of_life_schedule: Schedule,
    requests: Receiver<BusRequest>,
}

impl MeterService {
    /// Builds the bridge (reading the device identity once) and arms the schedules
    pub async fn start(config: Config) -> Result<(Self, BusHandle), StartupError> {
        let device = HomeWizardAPI::new().map_err(StartupError::HttpClient)?;

        let bridge = match StateBridge::connect(&config, &device).await {
            Ok(bridge) => bridge,
            Err(e) => {
                error!("{e}");
                return Err(e);
            }
        };
        info!("Publishing as {}", bridge.service_name());

        let (request_tx, requests) = mpsc::channel(32);
        let handle = BusHandle::new(request_tx, &bridge);

        let sign_of_life_schedule = Schedule::from_optional(config.sign_of_life_interval);
        if !sign_of_life_schedule.is_enabled() {
            info!("Sign of life logging disabled");
        }

        let service = Self {
            bridge,
            poller: Poller::new(config, device),
            poll_schedule: Schedule::every(POLL_INTERVAL),
            sign_of_life_schedule,
            requests,
        };
        Ok((service, handle))
    }

    pub fn bridge(&self) -> &StateBridge {
        &self.bridge
    }

    /// Runs until the process is stopped
    pub async fn run(mut self) {
        info!("Switching over to the event loop");
        loop {
            tokio::select! {
                _ = self.poll_schedule.tick() => {
                    keep_running("poll", self.poller.poll_once(&mut self.bridge).await);
                }
                _ = self.sign_of_life_schedule.tick() => {
                    sign_of_life::report(self.poller.last_update(), &self.bridge);
                }
                Some(request) = self.requests.recv() => {
                    self.bridge.handle_request(request);
                }
            }
        }
    }
}
