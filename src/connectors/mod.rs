//! Step-data providers.
//!
//! Most providers answer a "what is today's total" call in-process
//! ([`Connector::Polled`]). OAuth providers that leave the app to authorize
//! ([`Connector::Redirect`]) are launched fire-and-forget and resumed later from
//! their callback route.

mod apple_health;
mod device;
mod fitbit;
mod google_fit;

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use reqwest::Client;

use crate::{error::ConnectorError, models::{StepReading, StepSource}, settings::TrackerSettings};

pub use apple_health::AppleHealthConnector;
pub use device::{DeviceConnector, DeviceStream};
pub use fitbit::FitbitConnector;
pub use google_fit::GoogleFitConnector;

/// Request budget for third-party APIs; the aggregator's own connect timeout is tighter.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider that reports today's cumulative total when asked.
#[async_trait]
pub trait StepConnector: Send + Sync {
    fn source(&self) -> StepSource;

    /// Cheap pre-check consulted before a connection attempt. An unavailable
    /// source is reported without counting as a failed connection.
    fn is_available(&self) -> bool {
        true
    }

    async fn fetch_today(&self) -> Result<StepReading, ConnectorError>;
}

/// A provider that authorizes by sending the user to an external page.
#[async_trait]
pub trait RedirectConnector: Send + Sync {
    fn source(&self) -> StepSource;

    fn authorization_url(&self, state: &str) -> Result<String, ConnectorError>;

    /// Finishes the flow with the code delivered to the callback route.
    async fn complete(&self, code: &str) -> Result<StepReading, ConnectorError>;
}

#[derive(Clone)]
pub enum Connector {
    Polled(Arc<dyn StepConnector>),
    Redirect(Arc<dyn RedirectConnector>),
}

impl Connector {
    pub fn source(&self) -> StepSource {
        match self {
            Connector::Polled(connector) => connector.source(),
            Connector::Redirect(connector) => connector.source(),
        }
    }
}

/// Connectors available to one aggregator session, plus the device stream the
/// aggregator subscribes to at startup.
#[derive(Clone, Default)]
pub struct ConnectorSet {
    connectors: HashMap<StepSource, Connector>,
    device_stream: Option<DeviceStream>,
}

impl ConnectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, connector: Connector) -> Self {
        self.connectors.insert(connector.source(), connector);
        self
    }

    pub fn with_device(self, device: Arc<DeviceConnector>) -> Self {
        let stream = device.subscribe();
        let mut set = self.with(Connector::Polled(device));
        set.device_stream = Some(stream);
        set
    }

    pub fn get(&self, source: StepSource) -> Option<&Connector> {
        self.connectors.get(&source)
    }

    pub(crate) fn device_stream(&self) -> Option<DeviceStream> {
        self.device_stream.clone()
    }

    /// Every provider is registered; the ones without credentials fail with
    /// `Unconfigured` when connected.
    pub fn from_settings(settings: &TrackerSettings, device: Arc<DeviceConnector>) -> Result<Self> {
        let client = http_client()?;

        Ok(ConnectorSet::new()
            .with_device(device)
            .with(Connector::Polled(Arc::new(GoogleFitConnector::new(
                client.clone(),
                settings.google_fit.clone(),
            ))))
            .with(Connector::Polled(Arc::new(AppleHealthConnector::new(
                client.clone(),
                settings.apple_health.clone(),
            ))))
            .with(Connector::Redirect(Arc::new(FitbitConnector::new(
                client,
                settings.fitbit.clone(),
            )))))
    }
}

pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// Start of the current local calendar day.
pub(crate) fn local_midnight(now: DateTime<Local>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(chrono::NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or(now)
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn registry_covers_every_connectable_source() {
        let set = ConnectorSet::from_settings(
            &TrackerSettings::default(),
            Arc::new(DeviceConnector::new()),
        )
        .unwrap();

        for source in StepSource::ALL.into_iter().filter(StepSource::is_connectable) {
            let connector = set.get(source).unwrap();
            assert_eq!(connector.source(), source);
        }
        assert!(matches!(
            set.get(StepSource::Fitbit),
            Some(Connector::Redirect(_))
        ));
        assert!(set.get(StepSource::Manual).is_none());
        assert!(set.device_stream().is_some());
    }

    #[test]
    fn midnight_is_start_of_local_day() {
        let now = Local::now();
        let midnight = local_midnight(now).with_timezone(&Local);
        assert_eq!(midnight.date_naive(), now.date_naive());
        assert_eq!(midnight.hour(), 0);
        assert_eq!(midnight.minute(), 0);
    }
}
