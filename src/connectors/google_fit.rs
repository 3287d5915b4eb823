use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::ConnectorError,
    models::{StepReading, StepSource},
    settings::GoogleFitCredentials,
};

use super::{local_midnight, StepConnector};

const AGGREGATE_ENDPOINT: &str =
    "https://www.googleapis.com/fitness/v1/users/me/dataset:aggregate";
const STEP_DATA_TYPE: &str = "com.google.step_count.delta";
const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregateResponse {
    #[serde(default)]
    bucket: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
struct Bucket {
    #[serde(default)]
    dataset: Vec<Dataset>,
}

#[derive(Debug, Deserialize)]
struct Dataset {
    #[serde(default)]
    point: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct Point {
    #[serde(default)]
    value: Vec<PointValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointValue {
    int_val: Option<i64>,
}

fn sum_steps(response: &AggregateResponse) -> u64 {
    response
        .bucket
        .iter()
        .flat_map(|bucket| &bucket.dataset)
        .flat_map(|dataset| &dataset.point)
        .flat_map(|point| &point.value)
        .filter_map(|value| value.int_val)
        .map(|steps| steps.max(0) as u64)
        .sum()
}

fn aggregate_request(start: DateTime<Utc>, end: DateTime<Utc>) -> serde_json::Value {
    json!({
        "aggregateBy": [{ "dataTypeName": STEP_DATA_TYPE }],
        "bucketByTime": { "durationMillis": DAY_MS },
        "startTimeMillis": start.timestamp_millis(),
        "endTimeMillis": end.timestamp_millis(),
    })
}

/// Google Fit REST aggregate of today's step deltas.
pub struct GoogleFitConnector {
    client: Client,
    credentials: Option<GoogleFitCredentials>,
}

impl GoogleFitConnector {
    pub fn new(client: Client, credentials: Option<GoogleFitCredentials>) -> Self {
        Self {
            client,
            credentials,
        }
    }
}

#[async_trait]
impl StepConnector for GoogleFitConnector {
    fn source(&self) -> StepSource {
        StepSource::GoogleFit
    }

    async fn fetch_today(&self) -> Result<StepReading, ConnectorError> {
        let token = self
            .credentials
            .as_ref()
            .map(|c| c.access_token.as_str())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ConnectorError::Unconfigured("Google Fit access token".into()))?;

        let now = Local::now();
        let body = aggregate_request(local_midnight(now), now.with_timezone(&Utc));

        let response = self
            .client
            .post(AGGREGATE_ENDPOINT)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ConnectorError::PermissionDenied);
        }
        let aggregate: AggregateResponse = response.error_for_status()?.json().await?;

        Ok(StepReading::new(sum_steps(&aggregate), StepSource::GoogleFit))
    }
}
