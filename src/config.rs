use clap::Parser;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WatchdogError};

pub const DEFAULT_PROCESS: &str = "OpenVPNConnect";
pub const DEFAULT_DESTINATIONS: [&str; 3] = ["1.1.1.1", "8.8.8.8", "208.67.222.222"];
pub const DEFAULT_LOG_FILE: &str = "pulse-watchdog.log";

/// Pings destinations at set intervals and kills and restarts a process
/// if consecutive failures reach a threshold.
#[derive(Parser, Debug)]
#[command(name = "pulse-watchdog", version, about, long_about = None)]
pub struct Cli {
    /// Arguments passed to the restarted process (put them after `--`)
    #[arg(
        value_name = "RESTART_ARGS",
        num_args = 1..,
        required_unless_present = "config",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub restart_args: Vec<String>,

    /// The process to kill and restart
    #[arg(short, long, default_value = DEFAULT_PROCESS)]
    pub process: String,

    /// One or more destination IP addresses or host names to ping
    #[arg(short, long, num_args = 1.., default_values = DEFAULT_DESTINATIONS)]
    pub destinations: Vec<String>,

    /// Seconds between rounds
    #[arg(short, long, default_value_t = 15)]
    pub interval: u64,

    /// Consecutive failed rounds before restarting
    #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub failures: u32,

    /// Ping timeout in seconds
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Path to an auxiliary process to run every `--skip` rounds
    #[arg(short, long)]
    pub aux: Option<PathBuf>,

    /// Rounds between auxiliary process runs
    #[arg(short, long, default_value = "3")]
    pub skip: NonZeroU32,

    /// Argument string for the auxiliary process (split on whitespace on
    /// Unix, passed verbatim on Windows)
    #[arg(short = 'x', long, allow_hyphen_values = true)]
    pub auxargs: Option<String>,

    /// Seconds between killing the managed process and relaunching it
    #[arg(long, default_value_t = 5)]
    pub restart_delay: u64,

    /// Seconds to back off after an unexpected error in a round
    #[arg(long, default_value_t = 30)]
    pub cooldown: u64,

    /// Stop after this many rounds instead of running until interrupted
    #[arg(long)]
    pub rounds: Option<u64>,

    /// JSON file holding the whole configuration; replaces the options above
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Rolling log file
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,
}

impl Cli {
    pub fn into_config(self) -> Result<WatchdogConfig> {
        let config = match &self.config {
            Some(path) => WatchdogConfig::load(path)?,
            None => WatchdogConfig {
                restart_args: self.restart_args,
                process: self.process,
                destinations: self.destinations,
                interval_secs: self.interval,
                max_failures: self.failures,
                timeout_secs: self.timeout,
                aux: self.aux.map(|path| AuxSchedule {
                    path,
                    arguments: self.auxargs,
                    skip_periods: self.skip,
                }),
                timings: Timings {
                    restart_delay_secs: self.restart_delay,
                    cooldown_secs: self.cooldown,
                },
                max_rounds: self.rounds,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchdogConfig {
    pub restart_args: Vec<String>,
    #[serde(default = "default_process")]
    pub process: String,
    #[serde(default = "default_destinations")]
    pub destinations: Vec<String>,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub aux: Option<AuxSchedule>,
    #[serde(default)]
    pub timings: Timings,
    #[serde(default)]
    pub max_rounds: Option<u64>,
}

fn default_process() -> String { DEFAULT_PROCESS.into() }
fn default_destinations() -> Vec<String> { DEFAULT_DESTINATIONS.iter().map(|d| d.to_string()).collect() }
fn default_interval() -> u64 { 15 }
fn default_max_failures() -> u32 { 5 }
fn default_timeout() -> u64 { 3 }

impl WatchdogConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| WatchdogError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.destinations.is_empty() {
            return Err(WatchdogError::Config("at least one destination is required".into()));
        }
        if self.restart_args.is_empty() {
            return Err(WatchdogError::Config("at least one restart argument is required".into()));
        }
        if self.max_failures == 0 {
            return Err(WatchdogError::Config("failures must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(WatchdogError::Config("timeout must be at least 1 second".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Periodic auxiliary process launch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuxSchedule {
    pub path: PathBuf,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default = "default_skip_periods")]
    pub skip_periods: NonZeroU32,
}

fn default_skip_periods() -> NonZeroU32 { NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN) }

/// Fixed delays used around recovery actions.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Timings {
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_restart_delay() -> u64 { 5 }
fn default_cooldown() -> u64 { 30 }

impl Default for Timings {
    fn default() -> Self {
        Self {
            restart_delay_secs: default_restart_delay(),
            cooldown_secs: default_cooldown(),
        }
    }
}

impl Timings {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}
