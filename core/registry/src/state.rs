//! Request-level state for the registry daemon.
//!
//! Thin by design: every method validates already-parsed params, hits the
//! store, and logs degradation. The store is the source of truth; there is no
//! in-memory cache to drift.

use serde::Serialize;
use tracing::{info, warn};

use crate::store::{SessionSummary, Store};
use roster_registry_protocol::{
    AttendanceUpdateParams, MeetingEndedParams, MeetingStartedParams, ParticipantMap,
};

pub struct SharedState {
    store: Store,
}

/// Mirror of the tracker's status shape, answered from the durable side.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub is_tracking: bool,
    pub meeting_id: Option<String>,
    pub participant_count: usize,
    pub participants: ParticipantMap,
}

impl SharedState {
    /// Wraps the store and finalizes any session a dead tracker left behind.
    pub fn new(store: Store) -> Self {
        match store.recover_dangling_session() {
            Ok(Some(meeting_id)) => {
                info!(meeting_id = %meeting_id, "Recovered dangling session from previous run");
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "Failed to recover dangling session");
            }
        }
        Self { store }
    }

    pub fn meeting_started(&self, params: &MeetingStartedParams) -> Result<(), String> {
        info!(
            meeting_id = %params.meeting_id,
            url = %params.url,
            "Meeting started"
        );
        self.store.start_session(params)
    }

    pub fn attendance_update(&self, params: &AttendanceUpdateParams) -> Result<(), String> {
        tracing::debug!(
            meeting_id = %params.meeting_id,
            participant = %params.participant.name,
            action = ?params.action,
            participants = params.participants.len(),
            "Attendance update"
        );
        self.store.apply_update(params)
    }

    pub fn meeting_ended(&self, params: &MeetingEndedParams) -> Result<(), String> {
        info!(
            meeting_id = %params.meeting_id,
            participants = params.participants.len(),
            "Meeting ended"
        );
        self.store.end_session(params)
    }

    pub fn status_snapshot(&self) -> Result<StatusSnapshot, String> {
        let Some(meeting_id) = self.store.current_meeting()? else {
            return Ok(StatusSnapshot {
                is_tracking: false,
                meeting_id: None,
                participant_count: 0,
                participants: ParticipantMap::new(),
            });
        };
        let participants = self
            .store
            .get_session(&meeting_id)?
            .map(|session| session.participants)
            .unwrap_or_default();
        Ok(StatusSnapshot {
            is_tracking: true,
            participant_count: participants.len(),
            participants,
            meeting_id: Some(meeting_id),
        })
    }

    pub fn sessions_snapshot(&self) -> Result<Vec<SessionSummary>, String> {
        self.store.list_summaries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use roster_registry_protocol::{AttendanceAction, ParticipantRecord};

    fn state() -> (tempfile::TempDir, SharedState) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = Store::new(temp_dir.path().join("sessions.db")).expect("store init");
        (temp_dir, SharedState::new(store))
    }

    fn at(secs: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, secs).unwrap()
    }

    #[test]
    fn status_reflects_current_session() {
        let (_guard, state) = state();
        assert!(!state.status_snapshot().expect("status").is_tracking);

        state
            .meeting_started(&MeetingStartedParams {
                meeting_id: "abc-defg-hij".to_string(),
                started_at: at(0),
                url: "https://meet.example.com/abc-defg-hij".to_string(),
            })
            .expect("start");

        let record = ParticipantRecord::joined("Alice".to_string(), None, false, at(1));
        let mut participants = ParticipantMap::new();
        participants.insert("Alice".to_string(), record.clone());
        state
            .attendance_update(&AttendanceUpdateParams {
                meeting_id: "abc-defg-hij".to_string(),
                action: AttendanceAction::Joined,
                participant: record,
                participants: participants.clone(),
                recorded_at: at(1),
            })
            .expect("update");

        let status = state.status_snapshot().expect("status");
        assert!(status.is_tracking);
        assert_eq!(status.meeting_id.as_deref(), Some("abc-defg-hij"));
        assert_eq!(status.participant_count, 1);

        state
            .meeting_ended(&MeetingEndedParams {
                meeting_id: "abc-defg-hij".to_string(),
                ended_at: at(9),
                participants,
            })
            .expect("end");
        assert!(!state.status_snapshot().expect("status").is_tracking);
    }
}
