use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Local;
use tokio::sync::watch;

use crate::{
    error::ConnectorError,
    models::{StepReading, StepSource},
};

use super::StepConnector;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stride::connectors::device";

use crate::log_debug;

/// Latest on-device reading; `None` until the pedometer reports.
pub type DeviceStream = watch::Receiver<Option<StepReading>>;

/// The on-device pedometer. The host pushes cumulative totals in as the
/// platform sensor reports them and records whether motion permission was granted.
pub struct DeviceConnector {
    readings: watch::Sender<Option<StepReading>>,
    permission: AtomicBool,
}

impl Default for DeviceConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceConnector {
    pub fn new() -> Self {
        let (readings, _) = watch::channel(None);
        Self {
            readings,
            permission: AtomicBool::new(false),
        }
    }

    pub fn set_permission(&self, granted: bool) {
        log_debug!("device motion permission granted={}", granted);
        self.permission.store(granted, Ordering::SeqCst);
    }

    pub fn push(&self, step_count: u64) -> StepReading {
        let reading = StepReading::new(step_count, StepSource::Device);
        self.readings.send_replace(Some(reading.clone()));
        reading
    }

    pub fn subscribe(&self) -> DeviceStream {
        self.readings.subscribe()
    }

    fn latest_today(&self) -> Option<StepReading> {
        let today = Local::now().date_naive();
        self.readings
            .borrow()
            .as_ref()
            .filter(|reading| reading.observed_at.with_timezone(&Local).date_naive() == today)
            .cloned()
    }
}

#[async_trait]
impl StepConnector for DeviceConnector {
    fn source(&self) -> StepSource {
        StepSource::Device
    }

    fn is_available(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    async fn fetch_today(&self) -> Result<StepReading, ConnectorError> {
        if !self.is_available() {
            return Err(ConnectorError::PermissionDenied);
        }

        let mut stream = self.subscribe();
        if let Some(reading) = self.latest_today() {
            return Ok(reading);
        }

        loop {
            stream
                .changed()
                .await
                .map_err(|_| ConnectorError::Network("device sensor stream closed".into()))?;
            if let Some(reading) = stream.borrow_and_update().clone() {
                return Ok(reading);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn permission_gates_availability() {
        let device = DeviceConnector::new();
        assert!(!device.is_available());
        assert!(matches!(
            device.fetch_today().await,
            Err(ConnectorError::PermissionDenied)
        ));

        device.set_permission(true);
        assert!(device.is_available());
    }

    #[tokio::test]
    async fn fetch_returns_latest_reading_from_today() {
        let device = DeviceConnector::new();
        device.set_permission(true);
        device.push(4200);

        let reading = device.fetch_today().await.unwrap();
        assert_eq!(reading.step_count, 4200);
        assert_eq!(reading.source, StepSource::Device);
    }

    #[tokio::test]
    async fn fetch_waits_for_the_next_reading() {
        let device = Arc::new(DeviceConnector::new());
        device.set_permission(true);

        let waiting = tokio::spawn({
            let device = device.clone();
            async move { device.fetch_today().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        device.push(77);
        let reading = waiting.await.unwrap().unwrap();
        assert_eq!(reading.step_count, 77);
    }

    #[tokio::test]
    async fn subscribers_see_pushed_readings() {
        let device = DeviceConnector::new();
        let mut stream = device.subscribe();

        device.push(10);
        stream.changed().await.unwrap();
        assert_eq!(stream.borrow_and_update().as_ref().unwrap().step_count, 10);
    }
}
