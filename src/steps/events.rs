use std::num::NonZeroU32;

use chrono::NaiveDate;
use serde::Serialize;

use crate::{error::NoticeKind, models::StepSource};

use super::state::{AggregatorState, ConnectionState};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AggregatorEvent {
    StepsChanged { steps: u64, source: StepSource },
    ConnectionChanged { source: StepSource, state: ConnectionState },
    GoalChanged { goal: NonZeroU32 },
    /// Non-blocking, shown at most once per session.
    Notice { kind: NoticeKind, message: String },
    /// A redirect connector needs the user to authorize in the browser.
    RedirectRequested { source: StepSource, url: String },
}

impl AggregatorEvent {
    /// Channel name used when forwarding to the webview.
    pub fn name(&self) -> &'static str {
        match self {
            AggregatorEvent::StepsChanged { .. } => "steps-changed",
            AggregatorEvent::ConnectionChanged { .. } => "connection-changed",
            AggregatorEvent::GoalChanged { .. } => "goal-changed",
            AggregatorEvent::Notice { .. } => "tracker-notice",
            AggregatorEvent::RedirectRequested { .. } => "redirect-requested",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSnapshot {
    pub user_id: String,
    pub date: NaiveDate,
    pub goal_progress: u8,
    pub state: AggregatorState,
}
