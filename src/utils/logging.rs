//! Logging macros gated by a module-level `ENABLE_LOGS` flag and tagged with
//! the module's `LOG_TARGET`.
//!
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TARGET: &str = "stride::connectors";
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("connector ready");
//! ```
//!
//! Filtering per target works with `RUST_LOG=stride::connectors=debug`.

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!(target: LOG_TARGET, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!(target: LOG_TARGET, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!(target: LOG_TARGET, $($arg)*);
        }
    };
}

/// Errors are never silenced by `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        log::error!(target: LOG_TARGET, $($arg)*);
    };
}
