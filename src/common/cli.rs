//! CLI argument parsing for the TTTR tools
//!
//! # Design Principles (KISS)
//! - Use clap's derive macro for declarative argument definition
//! - Common arguments shared via composition, not inheritance
//! - Each binary has its own Args struct that embeds CommonArgs

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use crate::config::{Config, ConfigError};
use crate::reader::TimingMode;

/// Common arguments shared across all tools
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file
    #[arg(short = 'f', long = "config", env = "TTTR_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Timing mode (T2 or T3), overrides the config file
    #[arg(short, long)]
    pub mode: Option<TimingMode>,

    /// Time resolution in picoseconds, overrides the config file
    #[arg(long = "resolution-ps")]
    pub resolution_ps: Option<f64>,

    /// Sync period in seconds (T3), overrides the config file
    #[arg(long = "sync-period-s")]
    pub sync_period_s: Option<f64>,

    /// Write the JSON run summary to this file instead of stderr
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

impl CommonArgs {
    /// Load the config file (or defaults) and apply command line overrides
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config_file {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        self.apply_overrides(&mut config)?;
        Ok(config)
    }

    /// Apply `--mode`, `--resolution-ps` and `--sync-period-s`, then revalidate
    pub fn apply_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(mode) = self.mode {
            config.acquisition.mode = mode;
        }
        if let Some(resolution_ps) = self.resolution_ps {
            config.units.resolution_ps = resolution_ps;
        }
        if let Some(sync_period_s) = self.sync_period_s {
            config.units.sync_period_s = Some(sync_period_s);
        }
        config.validate()
    }

    /// Write a run summary as pretty JSON to `--summary` or stderr
    pub fn write_summary<T: Serialize>(&self, summary: &T) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(summary)?;
        match &self.summary {
            Some(path) => std::fs::write(path, json + "\n"),
            None => {
                eprintln!("{json}");
                Ok(())
            }
        }
    }
}

/// Arguments for tttr-decode (offline decoding of a raw record file)
#[derive(Parser, Debug, Clone)]
#[command(name = "tttr-decode")]
#[command(about = "Decode a raw TTTR record file into text")]
#[command(version)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Raw record file (little-endian u32 records)
    pub input: PathBuf,

    /// Text output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Records decoded per chunk
    #[arg(long = "chunk-records", default_value_t = 1_048_576)]
    pub chunk_records: usize,
}

/// Arguments for tttr-acquire (emulated multi-device acquisition)
#[derive(Parser, Debug, Clone)]
#[command(name = "tttr-acquire")]
#[command(about = "Acquire and decode TTTR records from emulated devices")]
#[command(version)]
pub struct AcquireArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of devices when the config file lists none
    #[arg(short = 'n', long = "devices", default_value_t = 1)]
    pub devices: u32,

    /// Events per device, overrides the emulator config
    #[arg(short, long)]
    pub events: Option<u64>,

    /// Directory for decoded text output (one file per device)
    #[arg(short, long = "output")]
    pub output_dir: Option<PathBuf>,

    /// Directory for raw record files (one file per device)
    #[arg(long = "raw-dir")]
    pub raw_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_args_default() {
        let args = CommonArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(args.mode, None);
        assert_eq!(args.summary, None);
    }

    #[test]
    fn test_common_args_custom_config() {
        let args = CommonArgs::try_parse_from(["test", "-f", "custom.toml"]).unwrap();
        assert_eq!(args.config_file, Some(PathBuf::from("custom.toml")));
    }

    #[test]
    fn test_mode_parsing() {
        let args = CommonArgs::try_parse_from(["test", "--mode", "t2"]).unwrap();
        assert_eq!(args.mode, Some(TimingMode::T2));
        let args = CommonArgs::try_parse_from(["test", "-m", "3"]).unwrap();
        assert_eq!(args.mode, Some(TimingMode::T3));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        assert!(CommonArgs::try_parse_from(["test", "--mode", "T4"]).is_err());
    }

    #[test]
    fn test_write_summary_to_file() {
        let path = std::env::temp_dir().join(format!("tttr-rs-{}-summary.json", std::process::id()));
        let args = CommonArgs::try_parse_from(["test", "--summary", path.to_str().unwrap()]).unwrap();

        args.write_summary(&serde_json::json!({ "records": 3 })).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["records"], 3);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_decode_args() {
        let args = DecodeArgs::try_parse_from([
            "tttr-decode",
            "run.out",
            "-m",
            "T3",
            "-o",
            "run.txt",
            "--sync-period-s",
            "1.25e-8",
            "--resolution-ps",
            "5",
        ])
        .unwrap();
        assert_eq!(args.input, PathBuf::from("run.out"));
        assert_eq!(args.output, Some(PathBuf::from("run.txt")));
        assert_eq!(args.common.mode, Some(TimingMode::T3));
        assert_eq!(args.common.sync_period_s, Some(1.25e-8));
        assert_eq!(args.common.resolution_ps, Some(5.0));
        assert_eq!(args.chunk_records, 1_048_576);
    }

    #[test]
    fn test_decode_args_requires_input() {
        assert!(DecodeArgs::try_parse_from(["tttr-decode"]).is_err());
    }

    #[test]
    fn test_acquire_args_default() {
        let args = AcquireArgs::try_parse_from(["tttr-acquire"]).unwrap();
        assert_eq!(args.devices, 1);
        assert_eq!(args.events, None);
        assert_eq!(args.output_dir, None);
        assert_eq!(args.raw_dir, None);
    }

    #[test]
    fn test_overrides_apply_before_units_check() {
        let path = std::env::temp_dir().join(format!("tttr-rs-{}-t3.toml", std::process::id()));
        std::fs::write(&path, "[acquisition]\nmode = \"T3\"\n").unwrap();
        let file = path.to_str().unwrap();

        // T3 file without a sync period, switched to T2 on the command line
        let args = CommonArgs::try_parse_from(["test", "-f", file, "-m", "T2"]).unwrap();
        let config = args.load_config().unwrap();
        assert_eq!(config.acquisition.mode, TimingMode::T2);
        assert!(config.units().is_ok());

        // Sync period supplied on the command line
        let args =
            CommonArgs::try_parse_from(["test", "-f", file, "--sync-period-s", "1.25e-8"]).unwrap();
        let units = args.load_config().unwrap().units().unwrap();
        assert_eq!(units.sync_period_s, Some(1.25e-8));

        let args = CommonArgs::try_parse_from(["test", "-f", file]).unwrap();
        assert!(args.load_config().unwrap().units().is_err());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = CommonArgs::try_parse_from(["test", "--resolution-ps", "0"]).unwrap();
        assert!(matches!(args.load_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_acquire_args_full() {
        let args = AcquireArgs::try_parse_from([
            "tttr-acquire",
            "-f",
            "acq.toml",
            "-n",
            "4",
            "--events",
            "1000",
            "-o",
            "./text",
            "--raw-dir",
            "./raw",
            "--sync-period-s",
            "1e-7",
            "--summary",
            "summary.json",
        ])
        .unwrap();
        assert_eq!(args.common.config_file, Some(PathBuf::from("acq.toml")));
        assert_eq!(args.devices, 4);
        assert_eq!(args.events, Some(1000));
        assert_eq!(args.output_dir, Some(PathBuf::from("./text")));
        assert_eq!(args.raw_dir, Some(PathBuf::from("./raw")));
        assert_eq!(args.common.sync_period_s, Some(1e-7));
        assert_eq!(args.common.summary, Some(PathBuf::from("summary.json")));
    }
}
