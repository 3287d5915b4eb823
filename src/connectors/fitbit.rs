use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::{
    error::ConnectorError,
    models::{StepReading, StepSource},
    settings::FitbitCredentials,
};

use super::RedirectConnector;

const AUTHORIZE_URL: &str = "https://www.fitbit.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";
const DAILY_SUMMARY_URL: &str = "https://api.fitbit.com/1/user/-/activities/date/today.json";
const SCOPE: &str = "activity";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DailySummaryResponse {
    summary: DailySummary,
}

#[derive(Debug, Deserialize)]
struct DailySummary {
    steps: u64,
}

/// Fitbit Web API over the OAuth2 authorization-code flow.
pub struct FitbitConnector {
    client: Client,
    credentials: Option<FitbitCredentials>,
}

impl FitbitConnector {
    pub fn new(client: Client, credentials: Option<FitbitCredentials>) -> Self {
        Self {
            client,
            credentials,
        }
    }

    fn credentials(&self) -> Result<&FitbitCredentials, ConnectorError> {
        self.credentials
            .as_ref()
            .filter(|c| !c.client_id.is_empty() && !c.redirect_uri.is_empty())
            .ok_or_else(|| ConnectorError::Unconfigured("Fitbit client credentials".into()))
    }
}

#[async_trait]
impl RedirectConnector for FitbitConnector {
    fn source(&self) -> StepSource {
        StepSource::Fitbit
    }

    fn authorization_url(&self, state: &str) -> Result<String, ConnectorError> {
        let credentials = self.credentials()?;
        let url = Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("response_type", "code"),
                ("client_id", credentials.client_id.as_str()),
                ("redirect_uri", credentials.redirect_uri.as_str()),
                ("scope", SCOPE),
                ("state", state),
            ],
        )
        .map_err(|err| ConnectorError::InvalidResponse(format!("authorize url: {err}")))?;
        Ok(url.into())
    }

    async fn complete(&self, code: &str) -> Result<StepReading, ConnectorError> {
        let credentials = self.credentials()?;

        let token: TokenResponse = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", credentials.redirect_uri.as_str()),
                ("client_id", credentials.client_id.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let daily: DailySummaryResponse = self
            .client
            .get(DAILY_SUMMARY_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(StepReading::new(daily.summary.steps, StepSource::Fitbit))
    }
}
