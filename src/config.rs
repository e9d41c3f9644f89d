use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::homewizard::FetchError;
use crate::state_tree::Phase;

pub const CONFIG_ENV: &str = "HOMEWIZARD_CONFIG";
const CONFIG_FILE_NAME: &str = "config.ini";
const ON_PREMISE: &str = "OnPremise";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("missing configuration key [{section}] {key}")]
    Missing {
        section: &'static str,
        key: &'static str,
    },
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("cannot locate configuration file: {0}")]
    Locate(#[from] std::io::Error),
}

/// Static service configuration, read once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub device_instance: u32,
    pub custom_name: String,
    /// Resolved against the allowed roles by the bridge
    pub role: String,
    pub phase: Phase,
    pub position: i64,
    /// `None` when sign-of-life logging is switched off
    pub sign_of_life_interval: Option<Duration>,
    /// Resolved when building the endpoint URL
    pub access_type: String,
    pub host: Option<String>,
    pub log_level: LevelFilter,
    /// A `LogLevel` name that was not recognised; reported once logging is up
    pub unknown_log_level: Option<String>,
}

impl Config {
    /// Where to look for `config.ini`: `$HOMEWIZARD_CONFIG`, else next to the executable
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let exe = env::current_exe()?;
        let dir = exe.parent().unwrap_or_else(|| Path::new("."));
        Ok(dir.join(CONFIG_FILE_NAME))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Ini))
            .build()?
            .try_deserialize::<HashMap<String, HashMap<String, String>>>()?;
        Self::from_sections(Sections::new(raw))
    }

    fn from_sections(sections: Sections) -> Result<Self, ConfigError> {
        let device_instance = sections.required("DEFAULT", "Deviceinstance")?;
        let device_instance = parse_number("Deviceinstance", device_instance)?;

        let phase = sections.required("DEFAULT", "Phase")?;
        let phase = phase.parse::<Phase>().map_err(|reason| ConfigError::Invalid {
            key: "Phase",
            value: phase.to_string(),
            reason,
        })?;

        let position = match sections.optional("DEFAULT", "Position") {
            Some(value) => parse_number("Position", value)?,
            None => 0,
        };

        let sign_of_life_minutes: u64 = match sections.optional("DEFAULT", "SignOfLifeLog") {
            Some(value) => parse_number("SignOfLifeLog", value)?,
            None => 0,
        };
        let sign_of_life_interval =
            (sign_of_life_minutes > 0).then(|| Duration::from_secs(sign_of_life_minutes * 60));

        let (log_level, unknown_log_level) =
            parse_log_level(sections.optional("DEFAULT", "LogLevel"));

        Ok(Self {
            device_instance,
            custom_name: sections
                .optional("DEFAULT", "CustomName")
                .unwrap_or_default()
                .to_string(),
            role: sections.required("DEFAULT", "Role")?.to_string(),
            phase,
            position,
            sign_of_life_interval,
            access_type: sections.required("DEFAULT", "AccessType")?.to_string(),
            host: sections.optional("ONPREMISE", "Host").map(str::to_string),
            log_level,
            unknown_log_level,
        })
    }

    /// The device's data endpoint for the configured access type
    pub fn status_url(&self) -> Result<String, FetchError> {
        if self.access_type != ON_PREMISE {
            return Err(FetchError::UnsupportedAccessType(self.access_type.clone()));
        }
        let host = self.host.as_deref().ok_or(FetchError::MissingHost)?;
        Ok(format!("http://{host}/api/v1/data"))
    }
}

/// Case-insensitive view over INI sections. Keys missing from a section
/// fall back to `[DEFAULT]`.
struct Sections {
    inner: HashMap<String, HashMap<String, String>>,
}

impl Sections {
    fn new(raw: HashMap<String, HashMap<String, String>>) -> Self {
        let inner = raw
            .into_iter()
            .map(|(section, keys)| {
                let keys = keys
                    .into_iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v))
                    .collect();
                (section.to_ascii_lowercase(), keys)
            })
            .collect();
        Self { inner }
    }

    fn lookup(&self, section: &str, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        let find = |section: &str| {
            self.inner
                .get(&section.to_ascii_lowercase())
                .and_then(|keys| keys.get(&key))
                .map(|v| v.trim())
        };
        find(section).or_else(|| find("DEFAULT"))
    }

    /// Present and non-blank
    fn optional(&self, section: &'static str, key: &'static str) -> Option<&str> {
        self.lookup(section, key).filter(|v| !v.is_empty())
    }

    fn required(&self, section: &'static str, key: &'static str) -> Result<&str, ConfigError> {
        self.lookup(section, key)
            .ok_or(ConfigError::Missing { section, key })
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Maps the level names used in `config.ini` onto tracing levels. Unknown
/// names fall back to info and are handed back so they can be logged.
fn parse_log_level(value: Option<&str>) -> (LevelFilter, Option<String>) {
    let Some(value) = value else {
        return (LevelFilter::INFO, None);
    };
    let level = match value.to_ascii_uppercase().as_str() {
        "TRACE" => LevelFilter::TRACE,
        "DEBUG" => LevelFilter::DEBUG,
        "INFO" => LevelFilter::INFO,
        "WARN" | "WARNING" => LevelFilter::WARN,
        "ERROR" | "CRITICAL" => LevelFilter::ERROR,
        _ => return (LevelFilter::INFO, Some(value.to_string())),
    };
    (level, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(name: &str, body: &str) -> PathBuf {
        let path = env::temp_dir().join(format!(
            "homewizard-bridge-{}-{name}.ini",
            std::process::id()
        ));
        fs::write(&path, body).unwrap();
        path
    }

    const FULL_CONFIG: &str = "\
[DEFAULT]
AccessType = OnPremise
SignOfLifeLog = 5
CustomName = Garage PV
Deviceinstance = 44
Role = pvinverter
Position = 1
Phase = L2
LogLevel = WARNING

[ONPREMISE]
Host = 192.168.1.50
";

    #[test]
    fn test_load_full_config() {
        let path = write_config("full", FULL_CONFIG);
        let config = Config::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.device_instance, 44);
        assert_eq!(config.custom_name, "Garage PV");
        assert_eq!(config.role, "pvinverter");
        assert_eq!(config.phase, Phase::L2);
        assert_eq!(config.position, 1);
        assert_eq!(config.sign_of_life_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.log_level, LevelFilter::WARN);
        assert_eq!(config.unknown_log_level, None);
        assert_eq!(
            config.status_url().unwrap(),
            "http://192.168.1.50/api/v1/data"
        );
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let path = write_config(
            "blank",
            "\
[DEFAULT]
AccessType = OnPremise
SignOfLifeLog =
CustomName =
Deviceinstance = 3
Role = grid
Position =
Phase = L1
LogLevel =

[ONPREMISE]
Host = meter.local
",
        );
        let config = Config::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.sign_of_life_interval, None);
        assert_eq!(config.position, 0);
        assert_eq!(config.custom_name, "");
        assert_eq!(config.log_level, LevelFilter::INFO);
    }

    #[test]
    fn test_invalid_phase_is_rejected() {
        let path = write_config("phase", &FULL_CONFIG.replace("Phase = L2", "Phase = L4"));
        let result = Config::load(&path);
        fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "Phase", .. })
        ));
    }

    #[test]
    fn test_missing_role_is_rejected() {
        let path = write_config("role", &FULL_CONFIG.replace("Role = pvinverter\n", ""));
        let result = Config::load(&path);
        fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(ConfigError::Missing { key: "Role", .. })
        ));
    }

    #[test]
    fn test_unsupported_access_type() {
        let path = write_config(
            "access",
            &FULL_CONFIG.replace("AccessType = OnPremise", "AccessType = Cloud"),
        );
        let config = Config::load(&path).unwrap();
        fs::remove_file(&path).ok();

        let err = config.status_url().unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedAccessType(ref t) if t == "Cloud"));
        assert_eq!(err.to_string(), "AccessType Cloud is not supported");
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level(None), (LevelFilter::INFO, None));
        assert_eq!(parse_log_level(Some("debug")), (LevelFilter::DEBUG, None));
        assert_eq!(parse_log_level(Some("CRITICAL")), (LevelFilter::ERROR, None));
        assert_eq!(parse_log_level(Some("Warning")), (LevelFilter::WARN, None));
        assert_eq!(
            parse_log_level(Some("verbose")),
            (LevelFilter::INFO, Some("verbose".to_string()))
        );
    }

    #[test]
    fn test_unknown_log_level_is_kept_for_reporting() {
        let path = write_config(
            "loglevel",
            &FULL_CONFIG.replace("LogLevel = WARNING", "LogLevel = chatty"),
        );
        let config = Config::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.log_level, LevelFilter::INFO);
        assert_eq!(config.unknown_log_level.as_deref(), Some("chatty"));
    }
}
