use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::ConnectorError,
    models::{StepReading, StepSource},
    settings::AppleHealthBridge,
};

use super::StepConnector;

/// HealthKit has no web API; totals come from a companion bridge that exports
/// today's count as `{"steps": n}`.
pub struct AppleHealthConnector {
    client: Client,
    bridge: Option<AppleHealthBridge>,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    steps: u64,
}

impl AppleHealthConnector {
    pub fn new(client: Client, bridge: Option<AppleHealthBridge>) -> Self {
        Self { client, bridge }
    }
}

#[async_trait]
impl StepConnector for AppleHealthConnector {
    fn source(&self) -> StepSource {
        StepSource::AppleHealth
    }

    async fn fetch_today(&self) -> Result<StepReading, ConnectorError> {
        let bridge = self
            .bridge
            .as_ref()
            .filter(|bridge| !bridge.endpoint.is_empty())
            .ok_or_else(|| ConnectorError::Unconfigured("Apple Health bridge endpoint".into()))?;

        let mut request = self.client.get(&bridge.endpoint);
        if let Some(token) = &bridge.token {
            request = request.bearer_auth(token);
        }

        let body: BridgeResponse = request.send().await?.error_for_status()?.json().await?;
        Ok(StepReading::new(body.steps, StepSource::AppleHealth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_bridge_is_unconfigured() {
        let connector = AppleHealthConnector::new(Client::new(), None);
        assert!(matches!(
            connector.fetch_today().await,
            Err(ConnectorError::Unconfigured(_))
        ));

        let blank = AppleHealthConnector::new(
            Client::new(),
            Some(AppleHealthBridge {
                endpoint: String::new(),
                token: None,
            }),
        );
        assert!(matches!(
            blank.fetch_today().await,
            Err(ConnectorError::Unconfigured(_))
        ));
    }

    #[test]
    fn bridge_payload_shape() {
        let body: BridgeResponse = serde_json::from_str(r#"{"steps": 6120}"#).unwrap();
        assert_eq!(body.steps, 6120);
        assert!(serde_json::from_str::<BridgeResponse>(r#"{"steps": -3}"#).is_err());
    }
}
