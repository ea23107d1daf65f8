//! Conditional logging macros gated by a module-level `ENABLE_LOGS` flag and
//! tagged with a module-level `LOG_TARGET`.
//!
//! Usage:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TARGET: &str = "worklens::sensing";
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("tick {} persisted", tick);
//! ```
//!
//! Records go through the `log` facade, so `RUST_LOG=worklens::sensing=debug`
//! narrows output to a single module at runtime while `ENABLE_LOGS = false`
//! removes it at compile time.

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

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!(target: LOG_TARGET, $($arg)*);
        }
    };
}
