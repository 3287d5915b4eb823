use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DAILY_STEP_GOAL: NonZeroU32 = match NonZeroU32::new(10_000) {
    Some(goal) => goal,
    None => unreachable!(),
};

/// Key inside the `user_settings.settings` JSON blob.
pub const STEP_GOAL_KEY: &str = "stepGoal";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserGoalSettings {
    pub user_id: String,
    pub daily_step_goal: NonZeroU32,
}

impl UserGoalSettings {
    pub fn new(user_id: impl Into<String>, daily_step_goal: NonZeroU32) -> Self {
        Self {
            user_id: user_id.into(),
            daily_step_goal,
        }
    }
}
