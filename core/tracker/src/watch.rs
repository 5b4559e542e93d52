//! Spool watcher: the mutation producer.
//!
//! The shim rewrites `snapshot.json` on every DOM mutation batch. Watching
//! the file's mtime is the tracker-side equivalent of a mutation observer;
//! each observed change becomes a raw ping into the scheduler's debouncer.
//! Stale queued page commands are pruned on a slow cadence from here too.

use roster_core::{Scheduler, SpoolPageAdapter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

const WATCH_INTERVAL_MS: u64 = 200;
const PRUNE_EVERY_TICKS: u32 = 300;
const COMMAND_MAX_AGE_SECS: u64 = 600;

pub fn spawn_spool_watcher(
    adapter: SpoolPageAdapter,
    scheduler: Arc<Scheduler>,
    shutdown: Arc<AtomicBool>,
) {
    thread::spawn(move || {
        let snapshot_path = adapter.snapshot_path();
        let mut last_modified: Option<SystemTime> = None;
        let mut ticks: u32 = 0;

        loop {
            thread::sleep(Duration::from_millis(WATCH_INTERVAL_MS));
            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            let modified = fs_err::metadata(&snapshot_path)
                .and_then(|meta| meta.modified())
                .ok();
            if modified.is_some() && modified != last_modified {
                last_modified = modified;
                scheduler.mutation_ping();
            }

            ticks = ticks.wrapping_add(1);
            if ticks % PRUNE_EVERY_TICKS == 0 {
                adapter.prune_stale_commands(Duration::from_secs(COMMAND_MAX_AGE_SECS));
            }
        }
    });
}
