mod activity;
mod user_settings;
