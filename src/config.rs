//! Configuration System using Figment
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `SCOPE_DAQ_` (nested keys split by `__`)
//! 2. TOML configuration file (default: `config/default.toml`)
//! 3. Built-in defaults
//!
//! The acquisition defaults (`events`, `channels`) are only proposals: the
//! operator can override both per run at the prompt.
//!
//! # Environment Variables
//!
//! ```text
//! SCOPE_DAQ_INSTRUMENT__ADDRESS="TCPIP0::192.168.189.115::inst0::INSTR"
//! SCOPE_DAQ_ACQUISITION__EVENTS=500
//! SCOPE_DAQ_STORAGE__PATH=/Volumes/WC/data
//! ```

use crate::error::{AppResult, DaqError};
use crate::instrument::vicp::VICP_PORT;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Highest oscilloscope channel number the drivers address (C1..C8).
pub const MAX_CHANNELS: u8 = 8;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Oscilloscope connection
    #[serde(default)]
    pub instrument: InstrumentSettings,
    /// Per-run acquisition defaults
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    /// Run container location and format
    #[serde(default)]
    pub storage: StorageSettings,
    /// Run ledger table
    #[serde(default)]
    pub ledger: LedgerSettings,
    /// Beam-status lookup service
    #[serde(default)]
    pub beam: BeamSettings,
    /// Archival handoff of finished run files
    #[serde(default)]
    pub archive: ArchiveSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Logging level used when `RUST_LOG` is not set (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Oscilloscope driver selection and connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// Driver name: `lecroy` or `mock`
    pub driver: String,
    /// VISA-style resource string or bare host name
    pub address: String,
    /// VICP TCP port
    pub port: u16,
    /// Delay between connection attempts in milliseconds
    pub connect_retry_ms: u64,
    /// Timeout for a single command/response exchange in milliseconds
    pub io_timeout_ms: u64,
    /// Interval between trigger-state polls in milliseconds
    pub trigger_poll_ms: u64,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            driver: "lecroy".to_string(),
            address: "TCPIP0::192.168.189.115::inst0::INSTR".to_string(),
            port: VICP_PORT,
            connect_retry_ms: 100,
            io_timeout_ms: 5_000,
            trigger_poll_ms: 5,
        }
    }
}

impl InstrumentSettings {
    pub fn connect_retry(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn trigger_poll(&self) -> Duration {
        Duration::from_millis(self.trigger_poll_ms)
    }
}

/// Defaults offered to the operator for each run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Target number of events per run
    pub events: u64,
    /// Number of channels read per event
    pub channels: u8,
    /// Print a per-channel summary of each stored event
    pub display: bool,
    /// Consecutive capture failures after which the run is ended
    pub max_consecutive_failures: u32,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            events: 1000,
            channels: 4,
            display: false,
            max_consecutive_failures: 5,
        }
    }
}

/// Run container settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory receiving `run_NNNNN.<ext>` files
    pub path: PathBuf,
    /// Container format: `framed` or `hdf5`
    pub format: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data"),
            format: "framed".to_string(),
        }
    }
}

/// Run ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// CSV table holding one row per run
    pub path: PathBuf,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/run_ledger.csv"),
        }
    }
}

/// Beam-status lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamSettings {
    /// Query the lookup service; otherwise runs are tagged `UNKNOWN`
    pub enabled: bool,
    /// memcached host
    pub host: String,
    /// memcached port
    pub port: u16,
    /// Key holding the beam-status string
    pub key: String,
    /// Whole-lookup timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for BeamSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "192.168.198.164".to_string(),
            port: 11211,
            key: "BTFDATA_PADME".to_string(),
            timeout_ms: 2_000,
        }
    }
}

/// Archival handoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSettings {
    /// Hand finished containers to `command`
    pub enabled: bool,
    /// Program and leading arguments; the container path is appended
    pub command: Vec<String>,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["./uploadFile.py".into(), "-g".into(), "-r".into()],
        }
    }
}

impl Settings {
    /// Load from the default file location (missing file falls back to defaults).
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file, then apply `SCOPE_DAQ_` overrides.
    pub fn load_from(path: impl AsRef<Path>) -> AppResult<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SCOPE_DAQ_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic checks that parsing cannot express.
    pub fn validate(&self) -> AppResult<()> {
        if !matches!(self.instrument.driver.as_str(), "lecroy" | "mock") {
            return Err(DaqError::Configuration(format!(
                "unknown instrument driver '{}' (expected 'lecroy' or 'mock')",
                self.instrument.driver
            )));
        }
        if self.instrument.address.trim().is_empty() {
            return Err(DaqError::Configuration(
                "instrument address cannot be empty".to_string(),
            ));
        }
        if self.acquisition.channels == 0 || self.acquisition.channels > MAX_CHANNELS {
            return Err(DaqError::Configuration(format!(
                "channel count must be between 1 and {MAX_CHANNELS}, got {}",
                self.acquisition.channels
            )));
        }
        if self.acquisition.events == 0 {
            return Err(DaqError::Configuration(
                "default event count must be positive".to_string(),
            ));
        }
        if self.acquisition.max_consecutive_failures == 0 {
            return Err(DaqError::Configuration(
                "max_consecutive_failures must be positive".to_string(),
            ));
        }
        if !matches!(self.storage.format.as_str(), "framed" | "hdf5") {
            return Err(DaqError::Configuration(format!(
                "unknown storage format '{}' (expected 'framed' or 'hdf5')",
                self.storage.format
            )));
        }
        if self.archive.enabled && self.archive.command.is_empty() {
            return Err(DaqError::Configuration(
                "archive is enabled but no command is configured".to_string(),
            ));
        }
        Ok(())
    }
}
