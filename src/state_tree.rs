use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One of the three AC phases a meter can be wired to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    L1,
    L2,
    L3,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::L1, Phase::L2, Phase::L3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::L1 => "L1",
            Phase::L2 => "L2",
            Phase::L3 => "L3",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "L1" => Ok(Phase::L1),
            "L2" => Ok(Phase::L2),
            "L3" => Ok(Phase::L3),
            other => Err(format!("unknown phase '{other}', expected L1, L2 or L3")),
        }
    }
}

/// Per-phase measurement published under `/Ac/<phase>/...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhaseQuantity {
    Voltage,
    Current,
    Power,
    EnergyForward,
}

impl PhaseQuantity {
    pub const ALL: [PhaseQuantity; 4] = [
        PhaseQuantity::Voltage,
        PhaseQuantity::Current,
        PhaseQuantity::Power,
        PhaseQuantity::EnergyForward,
    ];

    fn suffix(&self) -> &'static str {
        match self {
            PhaseQuantity::Voltage => "Voltage",
            PhaseQuantity::Current => "Current",
            PhaseQuantity::Power => "Power",
            PhaseQuantity::EnergyForward => "Energy/Forward",
        }
    }

    fn unit(&self) -> Unit {
        match self {
            PhaseQuantity::Voltage => Unit::Volt,
            PhaseQuantity::Current => Unit::Ampere,
            PhaseQuantity::Power => Unit::Watt,
            PhaseQuantity::EnergyForward => Unit::KiloWattHour,
        }
    }
}

/// Every path this service publishes on the state bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BusPath {
    ProcessName,
    ProcessVersion,
    Connection,
    DeviceInstance,
    ProductId,
    DeviceType,
    ProductName,
    CustomName,
    Latency,
    FirmwareVersion,
    HardwareVersion,
    Connected,
    Role,
    Position,
    Serial,
    UpdateIndex,
    StatusCode,
    AcEnergyForward,
    AcEnergyReverse,
    AcPower,
    AcCurrent,
    AcVoltage,
    Ac(Phase, PhaseQuantity),
}

impl BusPath {
    /// The writeable, formatted measurement paths
    pub fn measurements() -> Vec<BusPath> {
        let mut paths = vec![
            BusPath::AcEnergyForward,
            BusPath::AcEnergyReverse,
            BusPath::AcPower,
            BusPath::AcCurrent,
            BusPath::AcVoltage,
        ];
        for phase in Phase::ALL {
            for quantity in PhaseQuantity::ALL {
                paths.push(BusPath::Ac(phase, quantity));
            }
        }
        paths
    }

    pub fn unit(&self) -> Option<Unit> {
        match self {
            BusPath::AcEnergyForward | BusPath::AcEnergyReverse => Some(Unit::KiloWattHour),
            BusPath::AcPower => Some(Unit::Watt),
            BusPath::AcCurrent => Some(Unit::Ampere),
            BusPath::AcVoltage => Some(Unit::Volt),
            BusPath::Ac(_, quantity) => Some(quantity.unit()),
            _ => None,
        }
    }

    fn fixed_str(&self) -> Option<&'static str> {
        let path = match self {
            BusPath::ProcessName => "/Mgmt/ProcessName",
            BusPath::ProcessVersion => "/Mgmt/ProcessVersion",
            BusPath::Connection => "/Mgmt/Connection",
            BusPath::DeviceInstance => "/DeviceInstance",
            BusPath::ProductId => "/ProductId",
            BusPath::DeviceType => "/DeviceType",
            BusPath::ProductName => "/ProductName",
            BusPath::CustomName => "/CustomName",
            BusPath::Latency => "/Latency",
            BusPath::FirmwareVersion => "/FirmwareVersion",
            BusPath::HardwareVersion => "/HardwareVersion",
            BusPath::Connected => "/Connected",
            BusPath::Role => "/Role",
            BusPath::Position => "/Position",
            BusPath::Serial => "/Serial",
            BusPath::UpdateIndex => "/UpdateIndex",
            BusPath::StatusCode => "/StatusCode",
            BusPath::AcEnergyForward => "/Ac/Energy/Forward",
            BusPath::AcEnergyReverse => "/Ac/Energy/Reverse",
            BusPath::AcPower => "/Ac/Power",
            BusPath::AcCurrent => "/Ac/Current",
            BusPath::AcVoltage => "/Ac/Voltage",
            BusPath::Ac(..) => return None,
        };
        Some(path)
    }
}

impl fmt::Display for BusPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.fixed_str()) {
            (_, Some(path)) => f.write_str(path),
            (BusPath::Ac(phase, quantity), None) => write!(f, "/Ac/{phase}/{}", quantity.suffix()),
            (_, None) => unreachable!("every non-phase path has a fixed string"),
        }
    }
}

impl FromStr for BusPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const FIXED: [BusPath; 22] = [
            BusPath::ProcessName,
            BusPath::ProcessVersion,
            BusPath::Connection,
            BusPath::DeviceInstance,
            BusPath::ProductId,
            BusPath::DeviceType,
            BusPath::ProductName,
            BusPath::CustomName,
            BusPath::Latency,
            BusPath::FirmwareVersion,
            BusPath::HardwareVersion,
            BusPath::Connected,
            BusPath::Role,
            BusPath::Position,
            BusPath::Serial,
            BusPath::UpdateIndex,
            BusPath::StatusCode,
            BusPath::AcEnergyForward,
            BusPath::AcEnergyReverse,
            BusPath::AcPower,
            BusPath::AcCurrent,
            BusPath::AcVoltage,
        ];
        if let Some(path) = FIXED.iter().find(|p| p.fixed_str() == Some(s)) {
            return Ok(*path);
        }

        let rest = s
            .strip_prefix("/Ac/")
            .ok_or_else(|| format!("unknown path {s}"))?;
        let (phase, suffix) = rest
            .split_once('/')
            .ok_or_else(|| format!("unknown path {s}"))?;
        let phase: Phase = phase.parse().map_err(|_| format!("unknown path {s}"))?;
        PhaseQuantity::ALL
            .iter()
            .find(|q| q.suffix() == suffix)
            .map(|q| BusPath::Ac(phase, *q))
            .ok_or_else(|| format!("unknown path {s}"))
    }
}

/// Renders a raw numeric value for display, given the path it lives under
pub type TextFormatter = fn(&BusPath, f64) -> String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    KiloWattHour,
    Ampere,
    Volt,
    Watt,
}

impl Unit {
    pub fn decimals(&self) -> i32 {
        match self {
            Unit::KiloWattHour => 2,
            Unit::Ampere | Unit::Volt | Unit::Watt => 1,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::KiloWattHour => "kWh",
            Unit::Ampere => "A",
            Unit::Volt => "V",
            Unit::Watt => "W",
        }
    }

    pub fn formatter(&self) -> TextFormatter {
        match self {
            Unit::KiloWattHour => format_kwh,
            Unit::Ampere => format_amps,
            Unit::Volt => format_volts,
            Unit::Watt => format_watts,
        }
    }

    fn render(&self, value: f64) -> String {
        let scale = 10f64.powi(self.decimals());
        let rounded = (value * scale).round() / scale;
        // Debug keeps the trailing ".0" on whole numbers and drops padding zeros
        format!("{rounded:?}{}", self.symbol())
    }
}

pub fn format_kwh(_path: &BusPath, value: f64) -> String {
    Unit::KiloWattHour.render(value)
}

pub fn format_amps(_path: &BusPath, value: f64) -> String {
    Unit::Ampere.render(value)
}

pub fn format_volts(_path: &BusPath, value: f64) -> String {
    Unit::Volt.render(value)
}

pub fn format_watts(_path: &BusPath, value: f64) -> String {
    Unit::Watt.render(value)
}

/// A value as seen by bus consumers
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Empty | Value::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => f.write_str("None"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub formatter: Option<TextFormatter>,
    pub writeable: bool,
}

impl Entry {
    /// Display text: the unit formatter for numeric entries, the plain value otherwise
    pub fn text(&self, path: &BusPath) -> String {
        match (self.formatter, self.value.as_f64()) {
            (Some(format), Some(raw)) => format(path, raw),
            _ => self.value.to_string(),
        }
    }
}

/// Path-keyed storage behind the bridge. Knows nothing about devices.
#[derive(Debug, Default)]
pub struct StateTree {
    entries: BTreeMap<BusPath, Entry>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: BusPath, value: Value) {
        self.entries.insert(
            path,
            Entry {
                value,
                formatter: None,
                writeable: false,
            },
        );
    }

    pub fn add_measurement(&mut self, path: BusPath, formatter: TextFormatter) {
        self.entries.insert(
            path,
            Entry {
                value: Value::Float(0.0),
                formatter: Some(formatter),
                writeable: true,
            },
        );
    }

    pub fn entry(&self, path: &BusPath) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn get(&self, path: &BusPath) -> Option<&Value> {
        self.entries.get(path).map(|e| &e.value)
    }

    /// Stores `value`, returning whether it differed from what was there
    pub fn replace(&mut self, path: &BusPath, value: Value) -> Option<bool> {
        let entry = self.entries.get_mut(path)?;
        let changed = entry.value != value;
        entry.value = value;
        Some(changed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn remove(&mut self, path: &BusPath) -> Option<Entry> {
        self.entries.remove(path)
    }
}
