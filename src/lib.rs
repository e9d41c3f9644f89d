//! HomeWizard Bridge Library
//!
//! Polls a HomeWizard kWh meter over its local HTTP API and republishes the
//! reading as a Venus OS style state tree (`/Ac/L1/Power`, `/UpdateIndex`, ...)
//! for other processes to consume.

pub mod bridge;
pub mod config;
pub mod homewizard;
pub mod logging;
pub mod poller;
pub mod scheduler;
pub mod service;
pub mod sign_of_life;
pub mod state_tree;

// Re-export commonly used types for easier access
pub use bridge::{BusHandle, StateBridge, ValueChanged};
pub use crate::config::Config;
pub use homewizard::{DeviceReading, HomeWizardAPI};
pub use poller::Poller;
pub use service::MeterService;
pub use state_tree::{BusPath, Phase, PhaseQuantity, Value};
