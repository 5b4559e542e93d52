//! The page boundary: how the core sees the meeting page.
//!
//! The in-page shim owns the live DOM. It spools the latest serialized
//! snapshot into `<spool>/snapshot.json` (atomic rename) and executes command
//! files it finds under `<spool>/commands/`. The core only ever reads the
//! snapshot and queues commands; it never blocks on the shim.

use chrono::Utc;
use fs_err as fs;
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use crate::dom::{query_first, PageSnapshot, Selector};

const SNAPSHOT_FILE: &str = "snapshot.json";
const COMMANDS_DIR: &str = "commands";

pub const CMD_OPEN_PANEL: &str = "open_panel";
pub const CMD_CLOSE_PANEL: &str = "close_panel";

/// The control that opens the participant panel.
static PANEL_BUTTON_SELECTOR: Lazy<Option<Selector>> =
    Lazy::new(|| Selector::parse("button[aria-label*=People]"));

static COMMAND_SEQ: AtomicU64 = AtomicU64::new(0);

/// Everything the detection core needs from the meeting page.
///
/// `snapshot` returning `Ok(None)` means "no page data this scan" - a valid,
/// transient condition that must not produce observations or leaves.
pub trait PageAdapter: Send + Sync {
    fn snapshot(&self) -> Result<Option<PageSnapshot>, String>;

    /// Requests the participant panel be opened. `Ok(false)` means the panel
    /// control could not be located in the current snapshot.
    fn open_participant_panel(&self) -> Result<bool, String>;

    fn close_participant_panel(&self) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct SpoolPageAdapter {
    spool_dir: PathBuf,
}

impl SpoolPageAdapter {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.spool_dir.join(SNAPSHOT_FILE)
    }

    fn commands_dir(&self) -> PathBuf {
        self.spool_dir.join(COMMANDS_DIR)
    }

    fn queue_command(&self, action: &str) -> Result<(), String> {
        let dir = self.commands_dir();
        fs::create_dir_all(&dir)
            .map_err(|err| format!("Failed to create command dir: {}", err))?;

        let now = Utc::now();
        let seq = COMMAND_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{}-{}-{}.json", now.timestamp_millis(), seq, action));
        let payload = serde_json::json!({
            "action": action,
            "requested_at": now.to_rfc3339(),
        });
        let bytes = serde_json::to_vec_pretty(&payload)
            .map_err(|err| format!("Failed to serialize command: {}", err))?;

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes)
            .map_err(|err| format!("Failed to write command: {}", err))?;
        fs::rename(&tmp_path, &path)
            .map_err(|err| format!("Failed to commit command: {}", err))?;
        Ok(())
    }

    /// Drops command files the shim never consumed. The shim disappears with
    /// its tab; commands must not pile up across meetings.
    pub fn prune_stale_commands(&self, max_age: Duration) {
        let dir = self.commands_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read command dir for pruning");
                return;
            }
        };

        let now = SystemTime::now();
        for entry in entries.flatten() {
            let age = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if age.map(|age| age > max_age).unwrap_or(false) {
                if let Err(err) = fs::remove_file(entry.path()) {
                    tracing::warn!(error = %err, "Failed to prune stale command");
                }
            }
        }
    }
}

impl PageAdapter for SpoolPageAdapter {
    fn snapshot(&self) -> Result<Option<PageSnapshot>, String> {
        let path = self.snapshot_path();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(format!("Failed to read spooled snapshot: {}", err)),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|err| format!("Failed to parse spooled snapshot: {}", err))
    }

    fn open_participant_panel(&self) -> Result<bool, String> {
        let Some(selector) = PANEL_BUTTON_SELECTOR.as_ref() else {
            return Ok(false);
        };
        let Some(snapshot) = self.snapshot()? else {
            return Ok(false);
        };
        if query_first(&snapshot.root, selector).is_none() {
            return Ok(false);
        }
        self.queue_command(CMD_OPEN_PANEL)?;
        Ok(true)
    }

    fn close_participant_panel(&self) -> Result<(), String> {
        self.queue_command(CMD_CLOSE_PANEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::DomNode;
    use std::collections::HashMap;

    fn write_snapshot(adapter: &SpoolPageAdapter, snapshot: &PageSnapshot) {
        fs::create_dir_all(adapter.spool_dir.clone()).expect("spool dir");
        let bytes = serde_json::to_vec(snapshot).expect("serialize");
        fs::write(adapter.snapshot_path(), bytes).expect("write snapshot");
    }

    fn snapshot_with_button(label: &str) -> PageSnapshot {
        PageSnapshot {
            url: "https://meet.example.com/abc-defg-hij".to_string(),
            captured_at: "2026-03-02T10:00:00Z".parse().expect("timestamp"),
            root: DomNode {
                tag: "body".to_string(),
                attributes: HashMap::new(),
                text: None,
                children: vec![DomNode {
                    tag: "button".to_string(),
                    attributes: HashMap::from([(
                        "aria-label".to_string(),
                        label.to_string(),
                    )]),
                    text: None,
                    children: vec![],
                }],
            },
        }
    }

    fn command_files(adapter: &SpoolPageAdapter) -> Vec<PathBuf> {
        match fs::read_dir(adapter.commands_dir()) {
            Ok(entries) => entries.flatten().map(|entry| entry.path()).collect(),
            Err(_) => vec![],
        }
    }

    #[test]
    fn missing_snapshot_is_no_data_not_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let adapter = SpoolPageAdapter::new(temp_dir.path());
        assert!(adapter.snapshot().expect("snapshot").is_none());
    }

    #[test]
    fn partial_snapshot_surfaces_as_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let adapter = SpoolPageAdapter::new(temp_dir.path());
        fs::write(adapter.snapshot_path(), b"{\"url\": \"https://x").expect("write");
        assert!(adapter.snapshot().is_err());
    }

    #[test]
    fn open_panel_queues_command_when_button_present() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let adapter = SpoolPageAdapter::new(temp_dir.path());
        write_snapshot(&adapter, &snapshot_with_button("Show People"));

        assert!(adapter.open_participant_panel().expect("open"));
        let files = command_files(&adapter);
        assert_eq!(files.len(), 1);
        let payload: serde_json::Value =
            serde_json::from_slice(&fs::read(&files[0]).expect("read")).expect("parse");
        assert_eq!(payload["action"], CMD_OPEN_PANEL);
    }

    #[test]
    fn open_panel_reports_missing_control() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let adapter = SpoolPageAdapter::new(temp_dir.path());
        write_snapshot(&adapter, &snapshot_with_button("Leave call"));

        assert!(!adapter.open_participant_panel().expect("open"));
        assert!(command_files(&adapter).is_empty());
    }

    #[test]
    fn prune_removes_only_stale_commands() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let adapter = SpoolPageAdapter::new(temp_dir.path());
        adapter.close_participant_panel().expect("queue");
        assert_eq!(command_files(&adapter).len(), 1);

        adapter.prune_stale_commands(Duration::from_secs(3600));
        assert_eq!(command_files(&adapter).len(), 1);

        adapter.prune_stale_commands(Duration::from_secs(0));
        assert!(command_files(&adapter).is_empty());
    }
}
