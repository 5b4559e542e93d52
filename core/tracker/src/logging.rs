//! Tracker logging setup.
//!
//! The tracker usually runs headless under a supervisor, so logs go to a
//! daily-rolling file under the roster home. Falls back to stderr when the
//! log directory cannot be created. `ROSTER_DEBUG_LOG=1` lowers the filter.

use roster_core::RosterPaths;
use std::env;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub fn init() -> Option<WorkerGuard> {
    let filter = build_filter();

    let log_dir = RosterPaths::resolve().ok().map(|paths| paths.log_dir());
    if let Some(log_dir) = log_dir {
        if fs_err::create_dir_all(&log_dir).is_ok() {
            let appender = tracing_appender::rolling::daily(&log_dir, "tracker.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            return Some(guard);
        }
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
    None
}

fn build_filter() -> EnvFilter {
    let debug_enabled = env::var("ROSTER_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
