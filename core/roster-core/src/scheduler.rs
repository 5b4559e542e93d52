//! Change-trigger scheduling.
//!
//! Every touch of the participant map flows through one mpsc channel with a
//! single consumer (the lifecycle controller). The producers are a mutation
//! debouncer, an unconditional poll ticker, an end-of-meeting check ticker,
//! and whoever holds a control sender. Serializing the triggers is what makes
//! scan/reconcile cycles atomic - there is no other synchronization.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::TrackerConfig;
use roster_registry_protocol::ParticipantMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Explicit StopTracking request.
    Requested,
    /// The host process is going away (signal, tab teardown).
    HostShutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Requested => "requested",
            StopReason::HostShutdown => "host_shutdown",
        }
    }
}

/// Answer to a GetStatus control request. A snapshot, never a live reference.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    pub is_tracking: bool,
    pub meeting_id: Option<String>,
    pub participant_count: usize,
    pub participants: ParticipantMap,
}

#[derive(Debug)]
pub enum ScanTrigger {
    /// Debounced DOM mutation burst settled.
    Mutation,
    /// Unconditional poll interval elapsed.
    Poll,
    /// Out-of-band scan (warmup, ForceScan control request).
    Force,
    /// End-of-meeting detector interval elapsed.
    EndCheck,
    Status {
        reply: Sender<TrackerStatus>,
    },
    Stop {
        reason: StopReason,
    },
}

pub struct Scheduler {
    trigger_tx: Sender<ScanTrigger>,
    ping_tx: Sender<()>,
    stopped: Arc<AtomicBool>,
}

impl Scheduler {
    /// Starts the producer threads and returns the scheduler handle plus the
    /// single consumer end of the trigger channel.
    pub fn start(config: &TrackerConfig) -> (Self, Receiver<ScanTrigger>) {
        let (trigger_tx, trigger_rx) = mpsc::channel();
        let (ping_tx, ping_rx) = mpsc::channel();
        let stopped = Arc::new(AtomicBool::new(false));

        spawn_debouncer(
            ping_rx,
            trigger_tx.clone(),
            Duration::from_millis(config.debounce_quiet_ms),
            Arc::clone(&stopped),
        );
        spawn_ticker(
            trigger_tx.clone(),
            Duration::from_millis(config.poll_interval_ms),
            Arc::clone(&stopped),
            || ScanTrigger::Poll,
        );
        spawn_ticker(
            trigger_tx.clone(),
            Duration::from_millis(config.end_check_interval_ms),
            Arc::clone(&stopped),
            || ScanTrigger::EndCheck,
        );

        (
            Self {
                trigger_tx,
                ping_tx,
                stopped,
            },
            trigger_rx,
        )
    }

    /// Reports one raw DOM mutation. Cheap; call on every spool change.
    pub fn mutation_ping(&self) {
        let _ = self.ping_tx.send(());
    }

    /// A cloneable producer handle for control surfaces and warmup.
    pub fn sender(&self) -> Sender<ScanTrigger> {
        self.trigger_tx.clone()
    }

    /// Stops all producers. An in-flight debounce quiet period is discarded,
    /// not allowed to fire afterwards.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn spawn_debouncer(
    ping_rx: Receiver<()>,
    trigger_tx: Sender<ScanTrigger>,
    quiet: Duration,
    stopped: Arc<AtomicBool>,
) {
    thread::spawn(move || {
        // Outer recv blocks until a burst begins; the inner loop restarts the
        // quiet period on every further ping, so at most one scan is pending
        // per burst.
        while ping_rx.recv().is_ok() {
            loop {
                match ping_rx.recv_timeout(quiet) {
                    Ok(()) => continue,
                    Err(RecvTimeoutError::Timeout) => {
                        if !stopped.load(Ordering::SeqCst)
                            && trigger_tx.send(ScanTrigger::Mutation).is_err()
                        {
                            return;
                        }
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        }
    });
}

fn spawn_ticker<F>(
    trigger_tx: Sender<ScanTrigger>,
    interval: Duration,
    stopped: Arc<AtomicBool>,
    make_trigger: F,
) where
    F: Fn() -> ScanTrigger + Send + 'static,
{
    thread::spawn(move || loop {
        thread::sleep(interval);
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        if trigger_tx.send(make_trigger()).is_err() {
            return;
        }
    });
}
