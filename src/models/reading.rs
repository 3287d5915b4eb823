use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a step count came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    Device,
    Manual,
    Fitbit,
    AppleHealth,
    GoogleFit,
}

impl StepSource {
    pub const ALL: [StepSource; 5] = [
        StepSource::Device,
        StepSource::Manual,
        StepSource::Fitbit,
        StepSource::AppleHealth,
        StepSource::GoogleFit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepSource::Device => "device",
            StepSource::Manual => "manual",
            StepSource::Fitbit => "fitbit",
            StepSource::AppleHealth => "apple_health",
            StepSource::GoogleFit => "google_fit",
        }
    }

    /// Sources that are reached through a connector rather than typed in.
    pub fn is_connectable(&self) -> bool {
        !matches!(self, StepSource::Manual)
    }
}

impl fmt::Display for StepSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepSource {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "device" => Ok(StepSource::Device),
            "manual" => Ok(StepSource::Manual),
            "fitbit" => Ok(StepSource::Fitbit),
            "apple_health" => Ok(StepSource::AppleHealth),
            "google_fit" => Ok(StepSource::GoogleFit),
            other => Err(anyhow!("unknown step source '{other}'")),
        }
    }
}

/// A cumulative daily total reported by one source. Never stored as-is; only its
/// effect on the day's record persists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepReading {
    pub step_count: u64,
    pub observed_at: DateTime<Utc>,
    pub source: StepSource,
}

impl StepReading {
    pub fn new(step_count: u64, source: StepSource) -> Self {
        Self {
            step_count,
            observed_at: Utc::now(),
            source,
        }
    }

    pub fn manual(step_count: u64) -> Self {
        Self::new(step_count, StepSource::Manual)
    }
}
