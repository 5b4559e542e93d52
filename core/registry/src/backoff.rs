//! Crash-loop protection for the registry daemon.
//!
//! Supervisors restart the daemon on exit. If it is dying immediately (bad
//! database, bad socket dir), unthrottled restarts burn CPU and flood logs;
//! each start is recorded and rapid successions sleep before binding.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::warn;

const RECENT_WINDOW_SECS: i64 = 120;
const FREE_STARTS: usize = 3;
const DELAY_PER_EXTRA_START_SECS: u64 = 10;
const MAX_DELAY_SECS: u64 = 60;

#[derive(Default, Serialize, Deserialize)]
struct StartHistory {
    started_at: Vec<DateTime<Utc>>,
}

pub fn throttle_rapid_restarts(history_path: &Path) {
    let now = Utc::now();
    let mut history = read_history(history_path);
    history
        .started_at
        .retain(|start| (now - *start).num_seconds() <= RECENT_WINDOW_SECS);
    history.started_at.push(now);

    if let Err(err) = write_history(history_path, &history) {
        warn!(error = %err, "Failed to persist restart history");
    }

    if let Some(delay) = restart_delay(history.started_at.len()) {
        warn!(
            recent_starts = history.started_at.len(),
            delay_secs = delay.as_secs(),
            "Registry restarting rapidly; throttling"
        );
        thread::sleep(delay);
    }
}

fn restart_delay(recent_starts: usize) -> Option<Duration> {
    let extra = recent_starts.checked_sub(FREE_STARTS + 1)? as u64;
    let secs = DELAY_PER_EXTRA_START_SECS
        .saturating_mul(extra + 1)
        .min(MAX_DELAY_SECS);
    Some(Duration::from_secs(secs))
}

fn read_history(path: &Path) -> StartHistory {
    match fs::read(path) {
        Ok(data) => serde_json::from_slice(&data).unwrap_or_default(),
        Err(_) => StartHistory::default(),
    }
}

fn write_history(path: &Path, history: &StartHistory) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("Failed to create history dir: {}", err))?;
    }
    let payload = serde_json::to_vec_pretty(history)
        .map_err(|err| format!("Failed to serialize restart history: {}", err))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload).map_err(|err| format!("Failed to write history: {}", err))?;
    fs::rename(&tmp_path, path).map_err(|err| format!("Failed to commit history: {}", err))
}
