use std::num::NonZeroU32;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value};

use crate::db::{
    connection::Database,
    models::{UserGoalSettings, STEP_GOAL_KEY},
};

fn goal_from_blob(blob: &Map<String, Value>) -> Result<Option<NonZeroU32>> {
    let Some(raw) = blob.get(STEP_GOAL_KEY) else {
        return Ok(None);
    };

    let goal = raw
        .as_u64()
        .and_then(|value| u32::try_from(value).ok())
        .and_then(NonZeroU32::new)
        .ok_or_else(|| anyhow!("{STEP_GOAL_KEY} must be a positive integer, found {raw}"))?;
    Ok(Some(goal))
}

fn parse_blob(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("user settings blob is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("user settings blob must be a JSON object, found {other}")),
    }
}

impl Database {
    pub async fn get_goal_settings(&self, user_id: &str) -> Result<Option<UserGoalSettings>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT settings FROM user_settings WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(raw) = raw else {
                return Ok(None);
            };

            let blob = parse_blob(&raw)?;
            Ok(goal_from_blob(&blob)?.map(|goal| UserGoalSettings::new(user_id, goal)))
        })
        .await
    }

    /// Stores the goal in the user's settings blob, keeping any other keys intact.
    pub async fn save_goal_settings(&self, settings: &UserGoalSettings) -> Result<()> {
        let record = settings.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT settings FROM user_settings WHERE user_id = ?1",
                    params![record.user_id],
                    |row| row.get(0),
                )
                .optional()?;

            let mut blob = match existing {
                Some(raw) => parse_blob(&raw)?,
                None => Map::new(),
            };
            blob.insert(
                STEP_GOAL_KEY.to_string(),
                Value::from(record.daily_step_goal.get()),
            );

            tx.execute(
                "INSERT INTO user_settings (user_id, settings, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     settings = excluded.settings,
                     updated_at = excluded.updated_at",
                params![
                    record.user_id,
                    Value::Object(blob).to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| "failed to save user settings")?;

            tx.commit().context("failed to commit user settings")?;
            Ok(())
        })
        .await
    }
}
