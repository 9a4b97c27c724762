//! Configuration module for TTTR acquisition
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! [acquisition]
//! mode = "T3"
//! stop_grace_polls = 5
//!
//! [units]
//! resolution_ps = 5.0
//! sync_period_s = 1.25e-8
//!
//! [[devices]]
//! index = 0
//! name = "mh150-a"
//! output = "./data/dev0.out"
//!
//! [emulator]
//! events = 100000
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data_source_emulator::EmulatorConfig;
use crate::reader::device::TTREADMAX;
use crate::reader::TimingMode;
use crate::recorder::Units;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub units: UnitsConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    ///
    /// The T3 sync period requirement is checked by [`Config::units`], once
    /// command line overrides of the mode are applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.acquisition.max_batch_records == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.max_batch_records must be positive".to_string(),
            ));
        }
        self.units.check()?;

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.index) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device index {}",
                    device.index
                )));
            }
        }
        Ok(())
    }

    /// Get device configuration by index
    pub fn get_device(&self, index: u32) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.index == index)
    }

    /// Unit converter for the configured mode
    pub fn units(&self) -> Result<Units, ConfigError> {
        self.units.to_units(self.acquisition.mode)
    }
}

// =============================================================================
// Acquisition
// =============================================================================

/// Read loop parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Timing mode of every device in the run
    pub mode: TimingMode,
    /// Empty polls tolerated after the device reports completion
    pub stop_grace_polls: u32,
    /// Sleep between empty polls while running
    pub poll_idle_ms: u64,
    /// FIFO read buffer size in records
    pub max_batch_records: usize,
    /// Progress log interval (0 disables)
    pub progress_interval_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            mode: TimingMode::T3,
            stop_grace_polls: 5,
            poll_idle_ms: 0,
            max_batch_records: TTREADMAX,
            progress_interval_ms: 1000,
        }
    }
}

// =============================================================================
// Units
// =============================================================================

/// Physical units used when writing text output
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnitsConfig {
    /// Time resolution in picoseconds (T2 tick, T3 dtime bin)
    pub resolution_ps: f64,
    /// Sync period in seconds, required in T3
    pub sync_period_s: Option<f64>,
}

impl Default for UnitsConfig {
    fn default() -> Self {
        Self {
            resolution_ps: 1.0,
            sync_period_s: None,
        }
    }
}

impl UnitsConfig {
    /// Values that are set must be positive
    pub fn check(&self) -> Result<(), ConfigError> {
        if !(self.resolution_ps.is_finite() && self.resolution_ps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "units.resolution_ps must be positive, got {}",
                self.resolution_ps
            )));
        }
        match self.sync_period_s {
            Some(p) if !(p.is_finite() && p > 0.0) => Err(ConfigError::Invalid(format!(
                "units.sync_period_s must be positive, got {p}"
            ))),
            _ => Ok(()),
        }
    }

    pub fn to_units(&self, mode: TimingMode) -> Result<Units, ConfigError> {
        self.check()?;
        if mode == TimingMode::T3 && self.sync_period_s.is_none() {
            return Err(ConfigError::Invalid(
                "units.sync_period_s is required in T3 mode".to_string(),
            ));
        }
        Ok(Units {
            resolution_ps: self.resolution_ps,
            sync_period_s: self.sync_period_s,
        })
    }
}

// =============================================================================
// Devices
// =============================================================================

/// One acquisition device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device index (0-based)
    pub index: u32,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Raw record output file
    #[serde(default)]
    pub output: Option<PathBuf>,
}
