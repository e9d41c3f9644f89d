//! The published state tree as other processes see it.
//!
//! The bridge owns every bus entry, formats numeric values for display,
//! accepts write-backs from outside and broadcasts changes. It is built once
//! at startup and lives until the process exits.

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::homewizard::{DeviceReading, FetchError, HomeWizardAPI};
use crate::state_tree::{BusPath, StateTree, Value};

pub const SERVICE_NAMESPACE: &str = "com.victronenergy";
pub const ALLOWED_ROLES: [&str; 2] = ["pvinverter", "grid"];
pub const PRODUCT_ID: i64 = 0xA144;
pub const DEVICE_TYPE: i64 = 345;
pub const PRODUCT_NAME: &str = "HomeWizard kWh PV inverter";
pub const CONNECTION: &str = "HomeWizard HTTP JSON service";
pub const FIRMWARE_VERSION: f64 = 0.2;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configured Role '{0}' is not in the allowed list")]
    UnsupportedRole(String),
    #[error("response does not contain '{0}' attribute")]
    MissingIdentity(&'static str),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum BridgeError {
    #[error("no entry registered at {0}")]
    UnknownPath(BusPath),
    #[error("{path} holds numbers, refusing {value:?}")]
    TypeMismatch { path: BusPath, value: Value },
}

/// Emitted whenever a stored value changes
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChanged {
    pub path: BusPath,
    pub value: Value,
    pub text: String,
}

/// Requests other tasks send to the loop that owns the bridge
#[derive(Debug)]
pub enum BusRequest {
    Get {
        path: String,
        reply: oneshot::Sender<Option<Value>>,
    },
    GetText {
        path: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Write {
        path: String,
        value: Value,
        reply: oneshot::Sender<bool>,
    },
}

pub struct StateBridge {
    service_name: String,
    tree: StateTree,
    changes: broadcast::Sender<ValueChanged>,
}

impl StateBridge {
    /// Validates the role, reads the device serial once and registers every entry.
    /// Any failure here is fatal: nothing retries before the timers run.
    pub async fn connect(config: &Config, device: &HomeWizardAPI) -> Result<Self, StartupError> {
        let role = resolve_role(&config.role)?;
        let serial = read_serial(config, device).await?;
        Ok(Self::with_identity(config, role, serial))
    }

    fn with_identity(config: &Config, role: &'static str, serial: String) -> Self {
        let service_name = format!(
            "{SERVICE_NAMESPACE}.{role}.http_{:02}",
            config.device_instance
        );
        let mut tree = StateTree::new();

        tree.add(BusPath::ProcessName, env!("CARGO_PKG_NAME").into());
        tree.add(BusPath::ProcessVersion, env!("CARGO_PKG_VERSION").into());
        tree.add(BusPath::Connection, CONNECTION.into());

        tree.add(BusPath::DeviceInstance, i64::from(config.device_instance).into());
        // Same product id for both roles, VRM classifies on it
        tree.add(BusPath::ProductId, PRODUCT_ID.into());
        tree.add(BusPath::DeviceType, DEVICE_TYPE.into());
        tree.add(BusPath::ProductName, PRODUCT_NAME.into());
        tree.add(BusPath::CustomName, config.custom_name.as_str().into());
        tree.add(BusPath::Latency, Value::Empty);
        tree.add(BusPath::FirmwareVersion, FIRMWARE_VERSION.into());
        tree.add(BusPath::HardwareVersion, 0i64.into());
        tree.add(BusPath::Connected, 1i64.into());
        tree.add(BusPath::Role, role.into());
        tree.add(BusPath::Position, config.position.into());
        tree.add(BusPath::Serial, serial.into());
        tree.add(BusPath::UpdateIndex, 0i64.into());
        // Dummy, lets VRM detect a PV inverter
        tree.add(BusPath::StatusCode, 0i64.into());

        for path in BusPath::measurements() {
            if let Some(unit) = path.unit() {
                tree.add_measurement(path, unit.formatter());
            }
        }

        let (changes, _) = broadcast::channel(64);
        info!("Registered {} paths on {service_name}", tree.len());
        Self {
            service_name,
            tree,
            changes,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn get(&self, path: BusPath) -> Option<&Value> {
        self.tree.get(&path)
    }

    /// Numeric value of `path`, 0.0 when absent or not a number
    pub fn number(&self, path: BusPath) -> f64 {
        self.get(path).and_then(Value::as_f64).unwrap_or_default()
    }

    pub fn text(&self, path: BusPath) -> Option<String> {
        self.tree.entry(&path).map(|entry| entry.text(&path))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ValueChanged> {
        self.changes.subscribe()
    }

    /// Stores a value on behalf of the service itself
    pub fn set(&mut self, path: BusPath, value: impl Into<Value>) -> Result<(), BridgeError> {
        let value = value.into();
        let entry = self
            .tree
            .entry(&path)
            .ok_or(BridgeError::UnknownPath(path))?;
        if entry.formatter.is_some() && value.as_f64().is_none() {
            return Err(BridgeError::TypeMismatch { path, value });
        }
        self.store(path, value);
        Ok(())
    }

    /// Bumps `/UpdateIndex`, wrapping at 256
    pub fn advance_update_index(&mut self) -> u8 {
        let current = self
            .get(BusPath::UpdateIndex)
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let next = ((current + 1) % 256) as u8;
        self.store(BusPath::UpdateIndex, Value::Int(i64::from(next)));
        next
    }

    /// Write-back from another process. Writeable entries always accept, but
    /// a measurement keeps its previous value when handed something that is
    /// not a number.
    pub fn handle_external_write(&mut self, path: &str, value: Value) -> bool {
        let Ok(bus_path) = path.parse::<BusPath>() else {
            warn!("Refusing write to unknown path {path}");
            return false;
        };
        let entry = self
            .tree
            .entry(&bus_path)
            .map(|entry| (entry.writeable, entry.formatter.is_some()));
        match entry {
            Some((true, true)) => {
                debug!("someone else updated {path} to {value}");
                match value.as_f64() {
                    Some(number) => self.store(bus_path, Value::Float(number)),
                    None => warn!("Ignoring non-numeric value '{value}' written to {path}"),
                }
                true
            }
            Some((true, false)) => {
                debug!("someone else updated {path} to {value}");
                self.store(bus_path, value);
                true
            }
            Some((false, _)) => {
                warn!("Refusing write to read-only path {path}");
                false
            }
            None => {
                error!("Path {path} parsed but was never registered");
                false
            }
        }
    }

    pub fn handle_request(&mut self, request: BusRequest) {
        // A dropped receiver only means the caller stopped waiting
        match request {
            BusRequest::Get { path, reply } => {
                let value = path.parse().ok().and_then(|p| self.get(p).cloned());
                let _ = reply.send(value);
            }
            BusRequest::GetText { path, reply } => {
                let text = path.parse().ok().and_then(|p| self.text(p));
                let _ = reply.send(text);
            }
            BusRequest::Write { path, value, reply } => {
                let accepted = self.handle_external_write(&path, value);
                let _ = reply.send(accepted);
            }
        }
    }

    fn store(&mut self, path: BusPath, value: Value) {
        if self.tree.replace(&path, value.clone()) == Some(true) {
            let text = self.text(path).unwrap_or_default();
            // No subscribers is fine
            let _ = self.changes.send(ValueChanged { path, value, text });
        }
    }
}

fn resolve_role(role: &str) -> Result<&'static str, StartupError> {
    ALLOWED_ROLES
        .iter()
        .find(|allowed| **allowed == role)
        .copied()
        .ok_or_else(|| StartupError::UnsupportedRole(role.to_string()))
}

/// Identity is read once, before any timer exists, so every failure is fatal
async fn read_serial(config: &Config, device: &HomeWizardAPI) -> Result<String, StartupError> {
    let url = config.status_url()?;
    let document = device.read_document(&url).await?;
    let reading = DeviceReading::from_document(document)?;
    reading
        .unique_id
        .filter(|id| !id.is_empty())
        .ok_or(StartupError::MissingIdentity("unique_id"))
}

/// Cloneable access to the bridge for other tasks. Every request is served
/// by the loop that owns the bridge, one at a time.
#[derive(Clone)]
pub struct BusHandle {
    requests: mpsc::Sender<BusRequest>,
    changes: broadcast::Sender<ValueChanged>,
}

impl BusHandle {
    pub fn new(requests: mpsc::Sender<BusRequest>, bridge: &StateBridge) -> Self {
        Self {
            requests,
            changes: bridge.changes.clone(),
        }
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Option<Value>> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(BusRequest::Get {
                path: path.to_string(),
                reply,
            })
            .await?;
        Ok(response.await?)
    }

    pub async fn get_text(&self, path: &str) -> anyhow::Result<Option<String>> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(BusRequest::GetText {
                path: path.to_string(),
                reply,
            })
            .await?;
        Ok(response.await?)
    }

    pub async fn write(&self, path: &str, value: impl Into<Value>) -> anyhow::Result<bool> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(BusRequest::Write {
                path: path.to_string(),
                value: value.into(),
                reply,
            })
            .await?;
        Ok(response.await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ValueChanged> {
        self.changes.subscribe()
    }
}
