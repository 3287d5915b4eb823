pub mod analytics;
pub mod connectors;
pub mod db;
pub mod error;
pub mod models;
pub mod settings;
pub mod steps;
pub mod store;
mod utils;

#[cfg(feature = "app")]
use std::sync::Arc;

#[cfg(feature = "app")]
use connectors::DeviceConnector;
#[cfg(feature = "app")]
use db::Database;
#[cfg(feature = "app")]
use settings::SettingsStore;
#[cfg(feature = "app")]
use steps::{
    commands::{
        complete_fitbit_authorization, connect_step_source, end_step_session, get_step_history,
        get_step_snapshot, get_step_summary, get_tracker_settings, report_device_steps,
        set_device_permission, set_tracker_settings, start_step_session, update_daily_goal,
        update_steps_manually,
    },
    StepAggregator,
};
#[cfg(feature = "app")]
use tauri::Manager;

#[cfg(feature = "app")]
pub(crate) struct AppState {
    pub(crate) db: Database,
    pub(crate) settings: SettingsStore,
    /// Outlives sessions so the sensor bridge can keep pushing between them.
    pub(crate) device: Arc<DeviceConnector>,
    pub(crate) session: tokio::sync::Mutex<Option<StepAggregator>>,
}

#[cfg(feature = "app")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Stride starting up...");

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let result = (|| -> anyhow::Result<()> {
                let app_data_dir = app
                    .path()
                    .app_data_dir()
                    .map_err(|err| anyhow::anyhow!(err))?;
                std::fs::create_dir_all(&app_data_dir)?;

                let database = Database::new(app_data_dir.join("stride.sqlite3"))?;
                let settings_store = SettingsStore::new(app_data_dir.join("settings.json"))?;

                app.manage(AppState {
                    db: database,
                    settings: settings_store,
                    device: Arc::new(DeviceConnector::new()),
                    session: tokio::sync::Mutex::new(None),
                });

                Ok(())
            })();

            result.map_err(|err| err.into())
        })
        .invoke_handler(tauri::generate_handler![
            start_step_session,
            end_step_session,
            get_step_snapshot,
            connect_step_source,
            complete_fitbit_authorization,
            update_steps_manually,
            update_daily_goal,
            report_device_steps,
            set_device_permission,
            get_step_history,
            get_step_summary,
            get_tracker_settings,
            set_tracker_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
