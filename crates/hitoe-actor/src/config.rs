//! Actor configuration.
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. A TOML file: the path given on the command line (`--config` or
//!    `$HITOE_CONFIG`), else `config.toml` in the platform config directory
//!    (optional)
//! 3. `HITOE__*` environment variables, `__` separating nested keys
//!    (`HITOE__REPORT__INTERVAL_SECS=5`)
//!
//! Configuration is never written back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hitoe_core::{CoreConfig, SensorDescriptor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "HITOE_CONFIG";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "HITOE";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors while loading the actor configuration.
#[derive(Debug, Error)]
pub enum ActorConfigError {
    /// A source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// The core settings are invalid.
    #[error(transparent)]
    Core(#[from] hitoe_core::ConfigError),

    /// An actor setting is invalid.
    #[error("Invalid {field}: {message}")]
    Invalid {
        /// Dotted key of the field.
        field: &'static str,
        /// What is wrong with it.
        message: &'static str,
    },
}

/// Complete actor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Session manager settings.
    pub core: CoreConfig,
    /// Which sensor to use and how to authenticate.
    pub sensor: SensorSelection,
    /// Retry policy of the connection workflow.
    pub retry: RetryConfig,
    /// Periodic report settings.
    pub report: ReportConfig,
    /// Simulated sensor driver.
    pub simulator: SimulatorConfig,
    /// JSON file logging instead of pretty stdout.
    pub production: bool,
}

/// A pincode remembered for one sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PincodeEntry {
    /// Sensor in canonical form, `type,id,address,mode,keys`.
    pub sensor: SensorDescriptor,
    /// Its pincode.
    pub pincode: String,
}

/// Sensor choice and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSelection {
    /// Sensor id to prefer when several are found.
    pub preferred_id: Option<String>,
    /// Pincode for sensors without an entry in `pincodes`.
    pub default_pincode: String,
    /// Per-sensor pincodes.
    pub pincodes: Vec<PincodeEntry>,
}

impl Default for SensorSelection {
    fn default() -> Self {
        Self {
            preferred_id: None,
            default_pincode: "0000".to_owned(),
            pincodes: Vec::new(),
        }
    }
}

impl SensorSelection {
    /// Picks the preferred sensor if it was found, else the first one.
    #[must_use]
    pub fn pick<'a>(&self, sensors: &'a [SensorDescriptor]) -> Option<&'a SensorDescriptor> {
        self.preferred_id
            .as_deref()
            .and_then(|id| sensors.iter().find(|s| s.id() == id))
            .or_else(|| sensors.first())
    }

    /// Pincode to present to `sensor`.
    #[must_use]
    pub fn pincode_for(&self, sensor: &SensorDescriptor) -> &str {
        self.pincodes
            .iter()
            .find(|entry| &entry.sensor == sensor)
            .map_or(self.default_pincode.as_str(), |entry| entry.pincode.as_str())
    }
}

/// Retry policy of the connection workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Pause before searching again.
    pub backoff_ms: u64,
    /// Receiver registration attempts after the first failure.
    pub receiver_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 3_000,
            receiver_attempts: 3,
        }
    }
}

impl RetryConfig {
    /// Pause before searching again.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Periodic report settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Seconds between reports.
    pub interval_secs: u64,
    /// Key identifying this actor in reports.
    pub actor_key: String,
    /// Module name in reports.
    pub module: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            actor_key: "hitoe:1".to_owned(),
            module: "hitoe".to_owned(),
        }
    }
}

impl ReportConfig {
    /// Time between reports.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Simulated sensor driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Sensors the simulator reports during discovery.
    pub sensors: Vec<SensorDescriptor>,
    /// Pincode every simulated sensor accepts.
    pub pincode: String,
    /// Delay before each reply.
    pub latency_ms: u64,
    /// Time between streamed heartrate rows.
    pub stream_interval_ms: u64,
    /// Resting heartrate the simulated wearer oscillates around.
    pub base_bpm: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sensors: vec![SensorDescriptor::new(
                hitoe_core::DEFAULT_DEVICE_TYPE,
                "SIM-0001",
                "00:00:00:00:00:01",
                "realtime",
                ["raw.hr", "raw.ecg", "raw.acc"],
            )],
            pincode: "0000".to_owned(),
            latency_ms: 50,
            stream_interval_ms: 1_000,
            base_bpm: 68.0,
        }
    }
}

impl SimulatorConfig {
    /// Delay before each reply.
    #[must_use]
    pub const fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Time between streamed rows.
    #[must_use]
    pub const fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms)
    }
}

impl ActorConfig {
    /// Loads the configuration from its sources, see the module docs.
    ///
    /// An explicitly named file must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a source is unreadable or a value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ActorConfigError> {
        let file = match path {
            Some(path) => file_source(path).required(true),
            None => match default_config_path() {
                Some(path) => file_source(&path).required(false),
                None => return Self::from_builder(::config::Config::builder()),
            },
        };

        Self::from_builder(::config::Config::builder().add_source(file))
    }

    fn from_builder(
        builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
    ) -> Result<Self, ActorConfigError> {
        let config: Self = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), ActorConfigError> {
        self.core.validate()?;

        let checks = [
            (self.report.interval_secs > 0, "report.interval_secs", "must be positive"),
            (!self.report.actor_key.is_empty(), "report.actor_key", "must not be empty"),
            (
                self.simulator.stream_interval_ms > 0,
                "simulator.stream_interval_ms",
                "must be positive",
            ),
            (
                self.simulator.base_bpm.is_finite() && self.simulator.base_bpm > 0.0,
                "simulator.base_bpm",
                "must be a positive number",
            ),
        ];
        match checks.into_iter().find(|(ok, _, _)| !ok) {
            Some((_, field, message)) => Err(ActorConfigError::Invalid { field, message }),
            None => Ok(()),
        }
    }
}

fn file_source(path: &Path) -> ::config::File<::config::FileSourceFile, ::config::FileFormat> {
    ::config::File::new(&path.to_string_lossy(), ::config::FileFormat::Toml)
}

/// `config.toml` in the platform config directory.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "hitoe").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
