use std::fmt;

use chrono::{DateTime, Local};
use tracing::info;

use crate::bridge::StateBridge;
use crate::state_tree::BusPath;

/// What a sign-of-life log shows. Built from read-only views of the state.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessReport {
    pub last_update: Option<DateTime<Local>>,
    pub ac_power: f64,
}

impl fmt::Display for LivenessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last_update {
            Some(at) => write!(f, "last update {}", at.format("%Y-%m-%d %H:%M:%S"))?,
            None => f.write_str("last update never")?,
        }
        write!(f, ", /Ac/Power {:?}", self.ac_power)
    }
}

pub fn report(last_update: Option<DateTime<Local>>, bridge: &StateBridge) -> LivenessReport {
    let report = LivenessReport {
        last_update,
        ac_power: bridge.number(BusPath::AcPower),
    };

    info!("--- Start: sign of life ---");
    match report.last_update {
        Some(at) => info!("Last update: {}", at.format("%Y-%m-%d %H:%M:%S")),
        None => info!("Last update: never"),
    }
    info!("Last '/Ac/Power': {:?}", report.ac_power);
    info!("--- End: sign of life ---");
    report
}
