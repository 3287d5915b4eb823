use std::{
    fs,
    num::NonZeroU32,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::db::DEFAULT_DAILY_STEP_GOAL;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stride::settings";

use crate::log_warn;

pub const MIN_CONNECT_TIMEOUT_MS: u64 = 3_000;
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEBUG_SYNC_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleFitCredentials {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FitbitCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppleHealthBridge {
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerSettings {
    pub sync_interval_secs: u64,
    pub connect_timeout_ms: u64,
    pub default_step_goal: NonZeroU32,
    pub google_fit: Option<GoogleFitCredentials>,
    pub fitbit: Option<FitbitCredentials>,
    pub apple_health: Option<AppleHealthBridge>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            sync_interval_secs: 30,
            connect_timeout_ms: MAX_CONNECT_TIMEOUT_MS,
            default_step_goal: DEFAULT_DAILY_STEP_GOAL,
            google_fit: None,
            fitbit: None,
            apple_health: None,
        }
    }
}

/// Runtime knobs for one aggregator session, resolved from [`TrackerSettings`]
/// and the environment.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub sync_interval: Duration,
    pub connect_timeout: Duration,
    pub default_goal: NonZeroU32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig::from_settings(&TrackerSettings::default())
    }
}

impl AggregatorConfig {
    pub fn from_settings(settings: &TrackerSettings) -> Self {
        let clamped =
            settings
                .connect_timeout_ms
                .clamp(MIN_CONNECT_TIMEOUT_MS, MAX_CONNECT_TIMEOUT_MS);
        if clamped != settings.connect_timeout_ms {
            log_warn!(
                "connect timeout {}ms outside {}..={}ms, using {}ms",
                settings.connect_timeout_ms,
                MIN_CONNECT_TIMEOUT_MS,
                MAX_CONNECT_TIMEOUT_MS,
                clamped
            );
        }

        Self {
            sync_interval: Duration::from_secs(settings.sync_interval_secs.max(1)),
            connect_timeout: Duration::from_millis(clamped),
            default_goal: settings.default_step_goal,
        }
    }

    /// Applies `STRIDE_DEBUG` and `STRIDE_SYNC_INTERVAL_SECS`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let debug_mode = lookup("STRIDE_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.sync_interval = Duration::from_secs(DEBUG_SYNC_INTERVAL_SECS);
        }

        if let Some(raw) = lookup("STRIDE_SYNC_INTERVAL_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => self.sync_interval = Duration::from_secs(secs),
                _ => log_warn!("ignoring invalid STRIDE_SYNC_INTERVAL_SECS '{}'", raw),
            }
        }

        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!(
                    "settings at {} are unreadable ({err}); using defaults",
                    path.display()
                );
                TrackerSettings::default()
            })
        } else {
            TrackerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn tracker(&self) -> TrackerSettings {
        self.read().clone()
    }

    /// Session config: stored settings plus environment overrides.
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig::from_settings(&self.read()).with_env_overrides()
    }

    pub fn update_tracker(&self, settings: TrackerSettings) -> Result<()> {
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        let settings = store.tracker();
        assert_eq!(settings.sync_interval_secs, 30);
        assert_eq!(settings.connect_timeout_ms, 5_000);
        assert_eq!(settings.default_step_goal.get(), 10_000);
        assert!(settings.fitbit.is_none());
    }

    #[test]
    fn updates_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.tracker();
        settings.sync_interval_secs = 60;
        settings.google_fit = Some(GoogleFitCredentials {
            access_token: "ya29.token".into(),
        });
        store.update_tracker(settings.clone()).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.tracker(), settings);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"connectTimeoutMs": 4000}"#).unwrap();

        let store = SettingsStore::new(path.clone()).unwrap();
        let settings = store.tracker();
        assert_eq!(settings.connect_timeout_ms, 4_000);
        assert_eq!(settings.sync_interval_secs, 30);

        fs::write(&path, r#"{"syncIntervalSecs": 10}"#).unwrap();
        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.tracker().sync_interval_secs, 10);
        assert_eq!(reopened.tracker().connect_timeout_ms, 5_000);
    }

    #[test]
    fn connect_timeout_is_clamped_to_window() {
        let mut settings = TrackerSettings::default();
        settings.connect_timeout_ms = 30_000;
        assert_eq!(
            AggregatorConfig::from_settings(&settings).connect_timeout,
            Duration::from_millis(MAX_CONNECT_TIMEOUT_MS)
        );

        settings.connect_timeout_ms = 100;
        assert_eq!(
            AggregatorConfig::from_settings(&settings).connect_timeout,
            Duration::from_millis(MIN_CONNECT_TIMEOUT_MS)
        );
    }

    fn lookup_from(
        vars: &'static [(&'static str, &'static str)],
    ) -> impl Fn(&str) -> Option<String> {
        move |key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn overrides_adjust_sync_interval() {
        let base = AggregatorConfig::default();
        assert_eq!(base.sync_interval, Duration::from_secs(30));

        let untouched = base.clone().with_overrides(lookup_from(&[]));
        assert_eq!(untouched.sync_interval, Duration::from_secs(30));

        let debug = base.clone().with_overrides(lookup_from(&[("STRIDE_DEBUG", "true")]));
        assert_eq!(debug.sync_interval, Duration::from_secs(DEBUG_SYNC_INTERVAL_SECS));

        let explicit = base
            .clone()
            .with_overrides(lookup_from(&[("STRIDE_DEBUG", "1"), ("STRIDE_SYNC_INTERVAL_SECS", "12")]));
        assert_eq!(explicit.sync_interval, Duration::from_secs(12));
    }

    #[test]
    fn invalid_interval_override_is_ignored() {
        let config = AggregatorConfig::default()
            .with_overrides(lookup_from(&[("STRIDE_SYNC_INTERVAL_SECS", "0")]));
        assert_eq!(config.sync_interval, Duration::from_secs(30));

        let config = AggregatorConfig::default()
            .with_overrides(lookup_from(&[("STRIDE_SYNC_INTERVAL_SECS", "soon")]));
        assert_eq!(config.sync_interval, Duration::from_secs(30));
    }

    #[test]
    fn session_config_follows_stored_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        let mut settings = store.tracker();
        settings.connect_timeout_ms = 4_000;
        settings.default_step_goal = NonZeroU32::new(7_500).unwrap();
        store.update_tracker(settings).unwrap();

        let config = store.aggregator_config();
        assert_eq!(config.connect_timeout, Duration::from_millis(4_000));
        assert_eq!(config.default_goal.get(), 7_500);
    }
}
