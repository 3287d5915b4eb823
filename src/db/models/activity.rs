use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StepSource;

/// The authoritative step count for one user on one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyStepRecord {
    pub user_id: String,
    pub date: NaiveDate,
    pub step_count: u64,
    pub last_source: StepSource,
    pub updated_at: DateTime<Utc>,
}
