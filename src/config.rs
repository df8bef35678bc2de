use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::engine::{CheckSettings, MissingRecordPolicy};

/// Longest debounce accepted; anything above reads as a typo.
const MAX_DEBOUNCE_MS: u64 = 10_000;

/// Settings shared by every subcommand. Each flag falls back to its
/// environment variable, then to the default.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Directory holding the schedule journal.
    #[arg(long, env = "TIDYSLOT_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "TIDYSLOT_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Quiet period before live re-validation runs. Read by
    /// `controller::spawn_live_validation`; the ops subcommands have no live form.
    #[arg(long, env = "TIDYSLOT_DEBOUNCE_MS", default_value_t = 300)]
    pub debounce_ms: u64,

    /// Journal appends after which writes trigger compaction.
    #[arg(long, env = "TIDYSLOT_COMPACT_THRESHOLD", default_value_t = 1000)]
    pub compact_threshold: u64,

    /// How to treat employees with no availability record.
    #[arg(long, env = "TIDYSLOT_MISSING_RECORD", value_enum, default_value_t = MissingRecordPolicy::Open)]
    pub missing_record: MissingRecordPolicy,

    /// Reject bookings that run outside the employee's start/end time.
    #[arg(long, env = "TIDYSLOT_ENFORCE_WORKING_HOURS")]
    pub enforce_working_hours: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    DebounceTooLong(u64),
    ZeroCompactThreshold,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DebounceTooLong(ms) => {
                write!(f, "debounce of {ms}ms exceeds {MAX_DEBOUNCE_MS}ms")
            }
            ConfigError::ZeroCompactThreshold => write!(f, "compact threshold must be positive"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::DebounceTooLong(self.debounce_ms));
        }
        if self.compact_threshold == 0 {
            return Err(ConfigError::ZeroCompactThreshold);
        }
        Ok(())
    }

    pub fn check_settings(&self) -> CheckSettings {
        CheckSettings {
            missing_record: self.missing_record,
            enforce_working_hours: self.enforce_working_hours,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("schedule.journal")
    }
}
