//! Session lifecycle: meeting start/end detection and the consumer loop.
//!
//! The controller is the single consumer of the trigger channel and the sole
//! owner of the in-memory session. Scan/reconcile cycles never suspend, so
//! each one is atomic with respect to the participant map; registry
//! notification happens after mutation and its failure cannot corrupt state.

use chrono::Utc;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::dom::{parse_selector_list, query_first, PageSnapshot, Selector};
use crate::page::PageAdapter;
use crate::roster::reconcile;
use crate::scanner::{has_participant_nodes, Scanner};
use crate::scheduler::{ScanTrigger, StopReason, TrackerStatus};
use crate::session::{meeting_code_from_url, MeetingSession};
use crate::sink::RegistrySink;
use roster_registry_protocol::{
    AttendanceUpdateParams, MeetingEndedParams, MeetingStartedParams,
};

/// Explicit end-of-call screen.
static CALL_ENDED_SELECTORS: Lazy<Vec<Selector>> =
    Lazy::new(|| parse_selector_list(&["[data-call-ended]", ".call-ended-screen"]));

/// Post-leave home screen. Only rendered after a local voluntary leave, so it
/// never fires for remote participants dropping.
static HOME_SCREEN_SELECTORS: Lazy<Vec<Selector>> =
    Lazy::new(|| parse_selector_list(&["button[aria-label*=Return to home]", ".home-screen"]));

/// In-meeting control UI. Present for the whole meeting, though it can
/// transiently vanish during re-renders.
static MEETING_CONTROL_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    parse_selector_list(&["[data-is-muted]", "button[aria-label*=microphone]"])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    Idle,
    Starting,
    Active,
    Ending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndSignal {
    MeetingCodeGone,
    CallEnded,
    ReturnedHome,
    ControlsMissing,
}

impl EndSignal {
    fn as_str(&self) -> &'static str {
        match self {
            EndSignal::MeetingCodeGone => "meeting_code_gone",
            EndSignal::CallEnded => "call_ended",
            EndSignal::ReturnedHome => "returned_home",
            EndSignal::ControlsMissing => "controls_missing",
        }
    }
}

/// Evaluates the independent end-of-meeting signals, in precedence order.
/// Missing controls are debounced with a consecutive-check counter; the
/// other signals fire immediately.
struct EndDetector {
    threshold: u32,
    controls_missing: u32,
}

impl EndDetector {
    fn new(threshold: u32) -> Self {
        Self {
            threshold,
            controls_missing: 0,
        }
    }

    fn reset(&mut self) {
        self.controls_missing = 0;
    }

    fn evaluate(&mut self, meeting_id: &str, snapshot: Option<&PageSnapshot>) -> Option<EndSignal> {
        let Some(snapshot) = snapshot else {
            // An unreadable page counts as a controls miss: the shim may be
            // gone with its tab, which is exactly the sustained-absence case.
            return self.record_controls_miss();
        };

        if meeting_code_from_url(&snapshot.url).as_deref() != Some(meeting_id) {
            return Some(EndSignal::MeetingCodeGone);
        }
        if matches_any(&snapshot.root, &CALL_ENDED_SELECTORS) {
            return Some(EndSignal::CallEnded);
        }
        if matches_any(&snapshot.root, &HOME_SCREEN_SELECTORS) {
            return Some(EndSignal::ReturnedHome);
        }
        if matches_any(&snapshot.root, &MEETING_CONTROL_SELECTORS) {
            self.controls_missing = 0;
            return None;
        }
        self.record_controls_miss()
    }

    fn record_controls_miss(&mut self) -> Option<EndSignal> {
        self.controls_missing = self.controls_missing.saturating_add(1);
        (self.controls_missing >= self.threshold).then_some(EndSignal::ControlsMissing)
    }
}

fn matches_any(root: &crate::dom::DomNode, selectors: &[Selector]) -> bool {
    selectors
        .iter()
        .any(|selector| query_first(root, selector).is_some())
}

pub struct LifecycleController<P: PageAdapter + 'static, S: RegistrySink> {
    config: TrackerConfig,
    adapter: Arc<P>,
    sink: S,
    scanner: Scanner,
    phase: TrackerPhase,
    session: Option<MeetingSession>,
    end_detector: EndDetector,
    /// Meeting code of a session ended while its URL still shows the code.
    /// Blocks an immediate restart; cleared once the code leaves the URL.
    finished_meeting: Option<String>,
    trigger_tx: Sender<ScanTrigger>,
    warmup_cancel: Option<Arc<AtomicBool>>,
    host_shutdown: Arc<AtomicBool>,
}

impl<P: PageAdapter + 'static, S: RegistrySink> LifecycleController<P, S> {
    pub fn new(
        config: TrackerConfig,
        adapter: Arc<P>,
        sink: S,
        trigger_tx: Sender<ScanTrigger>,
        host_shutdown: Arc<AtomicBool>,
    ) -> Self {
        let end_detector = EndDetector::new(config.controls_missing_threshold);
        Self {
            config,
            adapter,
            sink,
            scanner: Scanner::default(),
            phase: TrackerPhase::Idle,
            session: None,
            end_detector,
            finished_meeting: None,
            trigger_tx,
            warmup_cancel: None,
            host_shutdown,
        }
    }

    pub fn phase(&self) -> TrackerPhase {
        self.phase
    }

    /// Consumes triggers until a stop trigger or host shutdown. Always
    /// finalizes an active session before returning, whatever ended the loop.
    pub fn run(mut self, triggers: Receiver<ScanTrigger>) {
        loop {
            match triggers.recv_timeout(Duration::from_millis(250)) {
                Ok(trigger) => {
                    if !self.handle_trigger(trigger) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.host_shutdown.load(Ordering::SeqCst) {
                        self.finish(StopReason::HostShutdown.as_str());
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.finish(StopReason::HostShutdown.as_str());
                    return;
                }
            }
        }
    }

    fn handle_trigger(&mut self, trigger: ScanTrigger) -> bool {
        match trigger {
            ScanTrigger::Mutation | ScanTrigger::Poll | ScanTrigger::Force => self.scan_cycle(),
            ScanTrigger::EndCheck => self.end_check(),
            ScanTrigger::Status { reply } => {
                let _ = reply.send(self.status());
            }
            ScanTrigger::Stop { reason } => {
                self.finish(reason.as_str());
                return false;
            }
        }
        if self.host_shutdown.load(Ordering::SeqCst) {
            self.finish(StopReason::HostShutdown.as_str());
            return false;
        }
        true
    }

    fn scan_cycle(&mut self) {
        let snapshot = match self.adapter.snapshot() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "Failed to read page snapshot; skipping scan");
                return;
            }
        };

        if self.session.is_none() && !self.maybe_begin_session(&snapshot) {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let now = Utc::now();
        let observed = self.scanner.scan(&snapshot, &session.roster);
        let changes = reconcile(&mut session.roster, &observed, now);
        if changes.is_empty() {
            return;
        }

        debug!(
            meeting_id = %session.meeting_id,
            changes = changes.len(),
            participants = session.roster.len(),
            "Roster updated"
        );
        for change in &changes {
            let Some(record) = session.roster.get(&change.name) else {
                continue;
            };
            let params = AttendanceUpdateParams {
                meeting_id: session.meeting_id.clone(),
                action: change.action,
                participant: record.clone(),
                participants: session.roster.snapshot(),
                recorded_at: now,
            };
            if let Err(err) = self.sink.attendance_update(&params) {
                warn!(
                    error = %err,
                    participant = %change.name,
                    "Failed to notify registry of attendance update"
                );
            }
        }
    }

    /// Starts a session when the snapshot is inside a meeting. Returns false
    /// when no session was started.
    fn maybe_begin_session(&mut self, snapshot: &PageSnapshot) -> bool {
        let Some(meeting_id) = meeting_code_from_url(&snapshot.url) else {
            self.finished_meeting = None;
            return false;
        };
        if self.finished_meeting.as_deref() == Some(meeting_id.as_str()) {
            return false;
        }
        // Ended/home screens keep the meeting code in the URL; neither is a
        // meeting in progress.
        if matches_any(&snapshot.root, &CALL_ENDED_SELECTORS)
            || matches_any(&snapshot.root, &HOME_SCREEN_SELECTORS)
        {
            return false;
        }

        let now = Utc::now();
        info!(meeting_id = %meeting_id, url = %snapshot.url, "Meeting detected; tracking starts");
        self.phase = TrackerPhase::Starting;
        self.finished_meeting = None;
        self.end_detector.reset();

        let params = MeetingStartedParams {
            meeting_id: meeting_id.clone(),
            started_at: now,
            url: snapshot.url.clone(),
        };
        if let Err(err) = self.sink.meeting_started(&params) {
            warn!(error = %err, "Failed to notify registry of meeting start");
        }

        self.session = Some(MeetingSession::begin(meeting_id, snapshot.url.clone(), now));
        self.spawn_warmup();
        // Scanning proceeds without waiting for warmup to finish.
        self.phase = TrackerPhase::Active;
        true
    }

    /// One-shot initialization: coax the page into materializing participant
    /// nodes by opening the panel, then force a scan and close it again.
    /// Never touches the roster; it only drives the adapter and the queue.
    fn spawn_warmup(&mut self) {
        let cancel = Arc::new(AtomicBool::new(false));
        self.warmup_cancel = Some(Arc::clone(&cancel));
        let adapter = Arc::clone(&self.adapter);
        let trigger_tx = self.trigger_tx.clone();
        let config = self.config.clone();
        thread::spawn(move || run_warmup(adapter.as_ref(), &trigger_tx, &config, &cancel));
    }

    fn end_check(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let snapshot = match self.adapter.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Failed to read page snapshot for end check");
                None
            }
        };

        if let Some(signal) = self
            .end_detector
            .evaluate(&session.meeting_id, snapshot.as_ref())
        {
            info!(
                meeting_id = %session.meeting_id,
                signal = signal.as_str(),
                "End of meeting detected"
            );
            // A session ended by an in-page signal may leave its code in the
            // URL; latch it so the next scan does not instantly restart it.
            if signal != EndSignal::MeetingCodeGone {
                self.finished_meeting = Some(session.meeting_id.clone());
            }
            self.finish(signal.as_str());
        }
    }

    /// The single finalization path. Internal end signals, StopTracking, and
    /// host teardown all come through here and produce an identical finalized
    /// session shape.
    fn finish(&mut self, reason: &str) {
        if let Some(cancel) = self.warmup_cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
        let Some(mut session) = self.session.take() else {
            self.phase = TrackerPhase::Idle;
            return;
        };

        self.phase = TrackerPhase::Ending;
        let now = Utc::now();
        let flushed = session.finalize(now);
        info!(
            meeting_id = %session.meeting_id,
            reason,
            flushed = flushed.len(),
            participants = session.roster.len(),
            "Session finalized"
        );

        let params = MeetingEndedParams {
            meeting_id: session.meeting_id.clone(),
            ended_at: now,
            participants: session.roster.snapshot(),
        };
        if let Err(err) = self.sink.meeting_ended(&params) {
            warn!(error = %err, "Failed to notify registry of meeting end");
        }

        self.end_detector.reset();
        self.phase = TrackerPhase::Idle;
    }

    fn status(&self) -> TrackerStatus {
        match &self.session {
            Some(session) => TrackerStatus {
                is_tracking: true,
                meeting_id: Some(session.meeting_id.clone()),
                participant_count: session.roster.len(),
                participants: session.roster.snapshot(),
            },
            None => TrackerStatus {
                is_tracking: false,
                meeting_id: None,
                participant_count: 0,
                participants: Default::default(),
            },
        }
    }
}

fn run_warmup<P: PageAdapter + ?Sized>(
    adapter: &P,
    trigger_tx: &Sender<ScanTrigger>,
    config: &TrackerConfig,
    cancel: &AtomicBool,
) {
    // Locate and open the panel. No attempt bound here: the control may be
    // missing for as long as the pre-join screen is up. The session ending
    // cancels us.
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        match adapter.open_participant_panel() {
            Ok(true) => break,
            Ok(false) => debug!("Panel control not found; will retry"),
            Err(err) => warn!(error = %err, "Failed to request panel open"),
        }
        thread::sleep(Duration::from_millis(config.panel_open_backoff_ms));
    }

    // Wait, bounded, for the panel to materialize participant nodes.
    let mut cancelled = false;
    for _ in 0..config.warmup_max_attempts {
        if cancel.load(Ordering::SeqCst) {
            cancelled = true;
            break;
        }
        match adapter.snapshot() {
            Ok(Some(snapshot)) if has_participant_nodes(&snapshot) => break,
            Ok(_) => {}
            Err(err) => debug!(error = %err, "Warmup snapshot unreadable"),
        }
        thread::sleep(Duration::from_millis(config.warmup_retry_ms));
    }

    if !cancelled {
        let _ = trigger_tx.send(ScanTrigger::Force);
    }
    if let Err(err) = adapter.close_participant_panel() {
        warn!(error = %err, "Failed to request panel close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::DomNode;
    use roster_registry_protocol::{AttendanceAction, EventKind};
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePage {
        snapshot: Mutex<Option<PageSnapshot>>,
        fail_snapshot: Mutex<bool>,
        panel_opens: Mutex<u32>,
        panel_closes: Mutex<u32>,
        panel_available: Mutex<bool>,
    }

    impl FakePage {
        fn set_snapshot(&self, snapshot: Option<PageSnapshot>) {
            *self.snapshot.lock().expect("lock") = snapshot;
        }
    }

    impl PageAdapter for FakePage {
        fn snapshot(&self) -> Result<Option<PageSnapshot>, String> {
            if *self.fail_snapshot.lock().expect("lock") {
                return Err("simulated spool failure".to_string());
            }
            Ok(self.snapshot.lock().expect("lock").clone())
        }

        fn open_participant_panel(&self) -> Result<bool, String> {
            if !*self.panel_available.lock().expect("lock") {
                return Ok(false);
            }
            *self.panel_opens.lock().expect("lock") += 1;
            Ok(true)
        }

        fn close_participant_panel(&self) -> Result<(), String> {
            *self.panel_closes.lock().expect("lock") += 1;
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Started(String),
        Update(String, AttendanceAction),
        Ended(String, usize),
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Sent>>,
        ended_maps: Mutex<Vec<roster_registry_protocol::ParticipantMap>>,
        fail: Mutex<bool>,
    }

    impl RegistrySink for &RecordingSink {
        fn meeting_started(&self, params: &MeetingStartedParams) -> Result<(), String> {
            if *self.fail.lock().expect("lock") {
                return Err("simulated registry outage".to_string());
            }
            self.sent
                .lock()
                .expect("lock")
                .push(Sent::Started(params.meeting_id.clone()));
            Ok(())
        }

        fn attendance_update(&self, params: &AttendanceUpdateParams) -> Result<(), String> {
            if *self.fail.lock().expect("lock") {
                return Err("simulated registry outage".to_string());
            }
            self.sent.lock().expect("lock").push(Sent::Update(
                params.participant.name.clone(),
                params.action,
            ));
            Ok(())
        }

        fn meeting_ended(&self, params: &MeetingEndedParams) -> Result<(), String> {
            if *self.fail.lock().expect("lock") {
                return Err("simulated registry outage".to_string());
            }
            self.sent.lock().expect("lock").push(Sent::Ended(
                params.meeting_id.clone(),
                params.participants.len(),
            ));
            self.ended_maps
                .lock()
                .expect("lock")
                .push(params.participants.clone());
            Ok(())
        }
    }

    fn tile(name: &str) -> DomNode {
        DomNode {
            tag: "div".to_string(),
            attributes: HashMap::from([
                ("role".to_string(), "listitem".to_string()),
                ("aria-label".to_string(), name.to_string()),
            ]),
            text: None,
            children: vec![],
        }
    }

    fn control_bar() -> DomNode {
        DomNode {
            tag: "button".to_string(),
            attributes: HashMap::from([(
                "aria-label".to_string(),
                "Turn off microphone".to_string(),
            )]),
            text: None,
            children: vec![],
        }
    }

    fn meeting_snapshot(url: &str, names: &[&str]) -> PageSnapshot {
        let mut children: Vec<DomNode> = names.iter().map(|name| tile(name)).collect();
        children.push(control_bar());
        PageSnapshot {
            url: url.to_string(),
            captured_at: Utc::now(),
            root: DomNode {
                tag: "body".to_string(),
                attributes: HashMap::new(),
                text: None,
                children,
            },
        }
    }

    fn ended_snapshot(url: &str) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            captured_at: Utc::now(),
            root: DomNode {
                tag: "body".to_string(),
                attributes: HashMap::new(),
                text: None,
                children: vec![DomNode {
                    tag: "div".to_string(),
                    attributes: HashMap::from([(
                        "data-call-ended".to_string(),
                        "true".to_string(),
                    )]),
                    text: None,
                    children: vec![],
                }],
            },
        }
    }

    fn fast_config() -> TrackerConfig {
        TrackerConfig {
            warmup_max_attempts: 2,
            warmup_retry_ms: 1,
            panel_open_backoff_ms: 1,
            controls_missing_threshold: 3,
            ..TrackerConfig::default()
        }
    }

    fn controller<'a>(
        page: &Arc<FakePage>,
        sink: &'a RecordingSink,
    ) -> (
        LifecycleController<FakePage, &'a RecordingSink>,
        mpsc::Receiver<ScanTrigger>,
    ) {
        let (tx, rx) = mpsc::channel();
        let controller = LifecycleController::new(
            fast_config(),
            Arc::clone(page),
            sink,
            tx,
            Arc::new(AtomicBool::new(false)),
        );
        (controller, rx)
    }

    const MEETING_URL: &str = "https://meet.example.com/abc-defg-hij";

    #[test]
    fn scan_starts_session_and_reports_joins() {
        let page = Arc::new(FakePage::default());
        let sink = RecordingSink::default();
        let (mut controller, _rx) = controller(&page, &sink);

        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice", "Bob"])));
        controller.scan_cycle();

        assert_eq!(controller.phase(), TrackerPhase::Active);
        let sent = sink.sent.lock().expect("lock");
        assert_eq!(sent[0], Sent::Started("abc-defg-hij".to_string()));
        assert_eq!(sent.len(), 3);
        assert!(sent.contains(&Sent::Update("Alice".to_string(), AttendanceAction::Joined)));
        assert!(sent.contains(&Sent::Update("Bob".to_string(), AttendanceAction::Joined)));
    }

    #[test]
    fn no_session_without_meeting_code() {
        let page = Arc::new(FakePage::default());
        let sink = RecordingSink::default();
        let (mut controller, _rx) = controller(&page, &sink);

        page.set_snapshot(Some(meeting_snapshot("https://meet.example.com/", &["Alice"])));
        controller.scan_cycle();

        assert_eq!(controller.phase(), TrackerPhase::Idle);
        assert!(sink.sent.lock().expect("lock").is_empty());
    }

    #[test]
    fn snapshot_failure_degrades_to_no_scan() {
        let page = Arc::new(FakePage::default());
        let sink = RecordingSink::default();
        let (mut controller, _rx) = controller(&page, &sink);

        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
        controller.scan_cycle();
        *page.fail_snapshot.lock().expect("lock") = true;
        controller.scan_cycle();

        // Still tracking, Alice still present: a failed read is not a leave.
        let status = controller.status();
        assert!(status.is_tracking);
        assert!(status.participants.get("Alice").expect("record").is_present);
    }

    #[test]
    fn registry_outage_never_corrupts_roster() {
        let page = Arc::new(FakePage::default());
        let sink = RecordingSink::default();
        *sink.fail.lock().expect("lock") = true;
        let (mut controller, _rx) = controller(&page, &sink);

        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
        controller.scan_cycle();

        let status = controller.status();
        assert!(status.is_tracking);
        assert_eq!(status.participant_count, 1);
    }

    #[test]
    fn call_ended_screen_finalizes_with_leave_flush() {
        let page = Arc::new(FakePage::default());
        let sink = RecordingSink::default();
        let (mut controller, _rx) = controller(&page, &sink);

        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
        controller.scan_cycle();
        page.set_snapshot(Some(ended_snapshot(MEETING_URL)));
        controller.end_check();

        assert_eq!(controller.phase(), TrackerPhase::Idle);
        let sent = sink.sent.lock().expect("lock");
        assert_eq!(
            sent.last(),
            Some(&Sent::Ended("abc-defg-hij".to_string(), 1))
        );
        drop(sent);
        assert!(!controller.status().is_tracking);
    }

    #[test]
    fn ended_meeting_does_not_restart_while_code_lingers() {
        let page = Arc::new(FakePage::default());
        let sink = RecordingSink::default();
        let (mut controller, _rx) = controller(&page, &sink);

        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
        controller.scan_cycle();
        page.set_snapshot(Some(ended_snapshot(MEETING_URL)));
        controller.end_check();

        // URL still carries the code; a further scan must not reopen it.
        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
        controller.scan_cycle();
        assert!(!controller.status().is_tracking);

        // Once the code leaves the URL the latch clears and a new meeting
        // with the same code can start.
        page.set_snapshot(Some(meeting_snapshot("https://meet.example.com/", &[])));
        controller.scan_cycle();
        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
        controller.scan_cycle();
        assert!(controller.status().is_tracking);
    }

    #[test]
    fn controls_missing_ends_only_after_sustained_absence() {
        let page = Arc::new(FakePage::default());
        let sink = RecordingSink::default();
        let (mut controller, _rx) = controller(&page, &sink);

        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
        controller.scan_cycle();

        // Controls vanish (re-render): two checks are below the threshold.
        let bare = PageSnapshot {
            url: MEETING_URL.to_string(),
            captured_at: Utc::now(),
            root: DomNode::default(),
        };
        page.set_snapshot(Some(bare.clone()));
        controller.end_check();
        controller.end_check();
        assert!(controller.status().is_tracking);

        // Controls return: the counter resets.
        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
        controller.end_check();
        page.set_snapshot(Some(bare));
        controller.end_check();
        controller.end_check();
        assert!(controller.status().is_tracking);
        controller.end_check();
        assert!(!controller.status().is_tracking);
    }

    #[test]
    fn url_losing_code_ends_immediately() {
        let page = Arc::new(FakePage::default());
        let sink = RecordingSink::default();
        let (mut controller, _rx) = controller(&page, &sink);

        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
        controller.scan_cycle();
        page.set_snapshot(Some(meeting_snapshot("https://meet.example.com/", &[])));
        controller.end_check();

        assert!(!controller.status().is_tracking);
    }

    #[test]
    fn stop_trigger_and_end_signal_produce_identical_shapes() {
        let run = |end_via_stop: bool| -> Vec<EventKind> {
            let page = Arc::new(FakePage::default());
            let sink = RecordingSink::default();
            let (mut controller, _rx) = controller(&page, &sink);

            page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
            controller.scan_cycle();
            if end_via_stop {
                controller.handle_trigger(ScanTrigger::Stop {
                    reason: StopReason::Requested,
                });
            } else {
                page.set_snapshot(Some(ended_snapshot(MEETING_URL)));
                controller.end_check();
            }

            let maps = sink.ended_maps.lock().expect("lock");
            let map = maps.last().expect("finalized map");
            let record = map.get("Alice").expect("record");
            assert!(!record.is_present);
            record.events.iter().map(|event| event.kind).collect()
        };

        assert_eq!(run(true), run(false));
    }

    #[test]
    fn warmup_opens_panel_forces_scan_and_closes() {
        let page = Arc::new(FakePage::default());
        *page.panel_available.lock().expect("lock") = true;
        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice"])));
        let (tx, rx) = mpsc::channel();

        run_warmup(
            page.as_ref(),
            &tx,
            &fast_config(),
            &AtomicBool::new(false),
        );

        assert!(matches!(rx.try_recv(), Ok(ScanTrigger::Force)));
        assert_eq!(*page.panel_opens.lock().expect("lock"), 1);
        assert_eq!(*page.panel_closes.lock().expect("lock"), 1);
    }

    #[test]
    fn cancelled_warmup_never_forces_a_scan() {
        let page = Arc::new(FakePage::default());
        let (tx, rx) = mpsc::channel();

        run_warmup(page.as_ref(), &tx, &fast_config(), &AtomicBool::new(true));

        assert!(rx.try_recv().is_err());
        assert_eq!(*page.panel_opens.lock().expect("lock"), 0);
    }

    #[test]
    fn status_reply_flows_through_the_trigger_queue() {
        let page = Arc::new(FakePage::default());
        let sink = RecordingSink::default();
        let (mut controller, _rx) = controller(&page, &sink);

        page.set_snapshot(Some(meeting_snapshot(MEETING_URL, &["Alice", "Bob"])));
        controller.scan_cycle();

        let (reply_tx, reply_rx) = mpsc::channel();
        controller.handle_trigger(ScanTrigger::Status { reply: reply_tx });
        let status = reply_rx.try_recv().expect("status reply");
        assert!(status.is_tracking);
        assert_eq!(status.meeting_id.as_deref(), Some("abc-defg-hij"));
        assert_eq!(status.participant_count, 2);
    }
}
