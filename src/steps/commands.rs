use std::{num::NonZeroU32, sync::Arc};

use tauri::{AppHandle, Emitter, State};
use tauri_plugin_opener::OpenerExt;
use tokio::sync::broadcast::error::RecvError;

use crate::{
    analytics::StepSummary,
    connectors::ConnectorSet,
    db::DailyStepRecord,
    models::StepSource,
    settings::TrackerSettings,
    steps::{AggregatorEvent, StepAggregator, StepSnapshot},
    AppState,
};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stride::commands";

use crate::{log_info, log_warn};

async fn session_from_state(state: &State<'_, AppState>) -> Result<StepAggregator, String> {
    state
        .session
        .lock()
        .await
        .clone()
        .ok_or_else(|| "no step session is running".to_string())
}

fn forward_events(app_handle: AppHandle, aggregator: &StepAggregator) {
    let mut events = aggregator.subscribe();

    tauri::async_runtime::spawn(async move {
        loop {
            match events.recv().await {
                Ok(AggregatorEvent::RedirectRequested { source, url }) => {
                    if let Err(err) = app_handle.opener().open_url(&url, None::<&str>) {
                        log_warn!("failed to open {} authorization page: {err}", source);
                    }
                }
                Ok(event) => {
                    let _ = app_handle.emit(event.name(), &event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    log_warn!("dropped {} tracker events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tauri::command]
pub async fn start_step_session(
    state: State<'_, AppState>,
    app_handle: AppHandle,
    user_id: String,
) -> Result<StepSnapshot, String> {
    let mut session = state.session.lock().await;
    if let Some(previous) = session.take() {
        log_info!("replacing step session for {}", previous.user_id());
        previous.shutdown().await;
    }

    let connectors = ConnectorSet::from_settings(&state.settings.tracker(), state.device.clone())
        .map_err(|e| e.to_string())?;
    let config = state.settings.aggregator_config();

    let aggregator =
        StepAggregator::start(user_id, Arc::new(state.db.clone()), connectors, config).await;
    forward_events(app_handle, &aggregator);

    let snapshot = aggregator.snapshot().await;
    *session = Some(aggregator);
    Ok(snapshot)
}

#[tauri::command]
pub async fn end_step_session(state: State<'_, AppState>) -> Result<(), String> {
    let previous = state.session.lock().await.take();
    if let Some(aggregator) = previous {
        aggregator.shutdown().await;
    }
    Ok(())
}

#[tauri::command]
pub async fn get_step_snapshot(state: State<'_, AppState>) -> Result<StepSnapshot, String> {
    let aggregator = session_from_state(&state).await?;
    Ok(aggregator.snapshot().await)
}

#[tauri::command]
pub async fn connect_step_source(
    state: State<'_, AppState>,
    source: StepSource,
) -> Result<bool, String> {
    let aggregator = session_from_state(&state).await?;
    Ok(aggregator.connect_source(source).await)
}

#[tauri::command]
pub async fn complete_fitbit_authorization(
    state: State<'_, AppState>,
    code: String,
    state_token: String,
) -> Result<bool, String> {
    let aggregator = session_from_state(&state).await?;
    Ok(aggregator
        .complete_redirect(StepSource::Fitbit, &code, &state_token)
        .await)
}

#[tauri::command]
pub async fn update_steps_manually(state: State<'_, AppState>, steps: u64) -> Result<(), String> {
    let aggregator = session_from_state(&state).await?;
    aggregator.update_manually(steps).await;
    Ok(())
}

#[tauri::command]
pub async fn update_daily_goal(state: State<'_, AppState>, goal: u32) -> Result<(), String> {
    let goal = NonZeroU32::new(goal).ok_or_else(|| "daily goal must be at least 1".to_string())?;
    let aggregator = session_from_state(&state).await?;
    aggregator.update_daily_goal(goal).await;
    Ok(())
}

/// Cumulative pedometer total pushed from the platform sensor bridge.
#[tauri::command]
pub fn report_device_steps(state: State<'_, AppState>, steps: u64) -> Result<(), String> {
    state.device.push(steps);
    Ok(())
}

#[tauri::command]
pub fn set_device_permission(state: State<'_, AppState>, granted: bool) -> Result<(), String> {
    state.device.set_permission(granted);
    Ok(())
}

#[tauri::command]
pub async fn get_step_history(
    state: State<'_, AppState>,
    days: u32,
) -> Result<Vec<DailyStepRecord>, String> {
    let aggregator = session_from_state(&state).await?;
    aggregator.history(days).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_step_summary(state: State<'_, AppState>, days: u32) -> Result<StepSummary, String> {
    let aggregator = session_from_state(&state).await?;
    aggregator.summary(days).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_tracker_settings(state: State<'_, AppState>) -> Result<TrackerSettings, String> {
    Ok(state.settings.tracker())
}

/// Takes effect from the next session.
#[tauri::command]
pub fn set_tracker_settings(
    state: State<'_, AppState>,
    settings: TrackerSettings,
) -> Result<(), String> {
    state
        .settings
        .update_tracker(settings)
        .map_err(|e| e.to_string())
}
