pub mod activity;
pub mod user_settings;

pub use activity::DailyStepRecord;
pub use user_settings::{UserGoalSettings, DEFAULT_DAILY_STEP_GOAL, STEP_GOAL_KEY};
