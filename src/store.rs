use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::db::{DailyStepRecord, Database, UserGoalSettings};
use crate::models::StepSource;

/// Backing store for daily step records and per-user goal settings.
#[async_trait]
pub trait StepStore: Send + Sync {
    async fn get_daily_record(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStepRecord>>;

    /// Must keep the larger of `steps` and the stored count, atomically.
    async fn upsert_daily_max(
        &self,
        user_id: &str,
        date: NaiveDate,
        steps: u64,
        source: StepSource,
        observed_at: DateTime<Utc>,
    ) -> Result<DailyStepRecord>;

    async fn list_daily_records(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyStepRecord>>;

    async fn get_goal_settings(&self, user_id: &str) -> Result<Option<UserGoalSettings>>;

    async fn save_goal_settings(&self, settings: &UserGoalSettings) -> Result<()>;
}

#[async_trait]
impl StepStore for Database {
    async fn get_daily_record(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyStepRecord>> {
        Database::get_daily_record(self, user_id, date).await
    }

    async fn upsert_daily_max(
        &self,
        user_id: &str,
        date: NaiveDate,
        steps: u64,
        source: StepSource,
        observed_at: DateTime<Utc>,
    ) -> Result<DailyStepRecord> {
        Database::upsert_daily_max(self, user_id, date, steps, source, observed_at).await
    }

    async fn list_daily_records(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyStepRecord>> {
        Database::list_daily_records(self, user_id, from, to).await
    }

    async fn get_goal_settings(&self, user_id: &str) -> Result<Option<UserGoalSettings>> {
        Database::get_goal_settings(self, user_id).await
    }

    async fn save_goal_settings(&self, settings: &UserGoalSettings) -> Result<()> {
        Database::save_goal_settings(self, settings).await
    }
}
