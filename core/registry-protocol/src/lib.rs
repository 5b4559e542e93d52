//! IPC protocol types and validation for the roster registry and tracker.
//!
//! This crate is shared by the registry daemon, the tracker, and any UI
//! client to prevent schema drift. Each socket endpoint remains the authority
//! on validation, but clients can reuse the same types to construct valid
//! requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_MEETING_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    // Served by both sockets.
    GetHealth,
    GetStatus,
    // Registry socket.
    GetSessions,
    MeetingStarted,
    AttendanceUpdate,
    MeetingEnded,
    // Tracker control socket.
    ForceScan,
    StopTracking,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Attendance wire model
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Join,
    Leave,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::Leave => "leave",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

/// One participant's reconciled history within a meeting.
///
/// The tracker core is the only writer; everyone else treats this as a
/// read-only snapshot. `is_present` is derived state and must always equal
/// "last event kind is Join".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub events: Vec<AttendanceEvent>,
    pub is_present: bool,
    #[serde(default)]
    pub is_self: bool,
}

impl ParticipantRecord {
    pub fn joined(name: impl Into<String>, email: Option<String>, is_self: bool, at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            email,
            events: vec![AttendanceEvent {
                at,
                kind: EventKind::Join,
            }],
            is_present: true,
            is_self,
        }
    }

    pub fn last_event(&self) -> Option<&AttendanceEvent> {
        self.events.last()
    }

    /// Total number of joins, counting rejoins. Distinct from record creation
    /// count, which is always one.
    pub fn join_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| event.kind == EventKind::Join)
            .count()
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.name.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_participant", "name is required"));
        }
        if self.events.is_empty() {
            return Err(ErrorInfo::new(
                "invalid_participant",
                format!("{}: event history is empty", self.name),
            ));
        }
        if self.events[0].kind != EventKind::Join {
            return Err(ErrorInfo::new(
                "invalid_participant",
                format!("{}: history must start with a join", self.name),
            ));
        }
        for pair in self.events.windows(2) {
            if pair[0].kind == pair[1].kind {
                return Err(ErrorInfo::new(
                    "invalid_participant",
                    format!("{}: consecutive {} events", self.name, pair[1].kind.as_str()),
                ));
            }
            if pair[1].at < pair[0].at {
                return Err(ErrorInfo::new(
                    "invalid_participant",
                    format!("{}: event times regress", self.name),
                ));
            }
        }
        let derived = self
            .last_event()
            .map(|event| event.kind == EventKind::Join)
            .unwrap_or(false);
        if self.is_present != derived {
            return Err(ErrorInfo::new(
                "invalid_participant",
                format!("{}: is_present disagrees with history", self.name),
            ));
        }
        Ok(())
    }
}

pub type ParticipantMap = HashMap<String, ParticipantRecord>;

/// The attendance transition an `AttendanceUpdate` is notifying about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceAction {
    Joined,
    Rejoined,
    Left,
    EmailAdded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeetingStartedParams {
    pub meeting_id: String,
    pub started_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttendanceUpdateParams {
    pub meeting_id: String,
    pub action: AttendanceAction,
    pub participant: ParticipantRecord,
    pub participants: ParticipantMap,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeetingEndedParams {
    pub meeting_id: String,
    pub ended_at: DateTime<Utc>,
    pub participants: ParticipantMap,
}

pub fn parse_meeting_started(params: Value) -> Result<MeetingStartedParams, ErrorInfo> {
    let parsed: MeetingStartedParams = from_params(params)?;
    validate_meeting_id(&parsed.meeting_id)?;
    Ok(parsed)
}

pub fn parse_attendance_update(params: Value) -> Result<AttendanceUpdateParams, ErrorInfo> {
    let parsed: AttendanceUpdateParams = from_params(params)?;
    validate_meeting_id(&parsed.meeting_id)?;
    parsed.participant.validate()?;
    validate_participants(&parsed.participants)?;
    Ok(parsed)
}

pub fn parse_meeting_ended(params: Value) -> Result<MeetingEndedParams, ErrorInfo> {
    let parsed: MeetingEndedParams = from_params(params)?;
    validate_meeting_id(&parsed.meeting_id)?;
    validate_participants(&parsed.participants)?;
    Ok(parsed)
}

fn from_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ErrorInfo> {
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("payload is invalid JSON: {}", err),
        )
    })
}

fn validate_meeting_id(meeting_id: &str) -> Result<(), ErrorInfo> {
    if meeting_id.trim().is_empty() {
        return Err(ErrorInfo::new("invalid_meeting_id", "meeting_id is required"));
    }
    if meeting_id.len() > MAX_MEETING_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_meeting_id",
            format!("meeting_id must be {} characters or fewer", MAX_MEETING_ID_LEN),
        ));
    }
    Ok(())
}

fn validate_participants(participants: &ParticipantMap) -> Result<(), ErrorInfo> {
    for (name, record) in participants {
        if name != &record.name {
            return Err(ErrorInfo::new(
                "invalid_participant",
                format!("map key {} disagrees with record name {}", name, record.name),
            ));
        }
        record.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, secs).unwrap()
    }

    fn alice(events: Vec<(u32, EventKind)>) -> ParticipantRecord {
        let events: Vec<AttendanceEvent> = events
            .into_iter()
            .map(|(secs, kind)| AttendanceEvent { at: at(secs), kind })
            .collect();
        let is_present = events
            .last()
            .map(|event| event.kind == EventKind::Join)
            .unwrap_or(false);
        ParticipantRecord {
            name: "Alice".to_string(),
            email: None,
            events,
            is_present,
            is_self: false,
        }
    }

    #[test]
    fn validates_alternating_history() {
        let record = alice(vec![
            (0, EventKind::Join),
            (10, EventKind::Leave),
            (20, EventKind::Join),
        ]);
        assert!(record.validate().is_ok());
        assert_eq!(record.join_count(), 2);
    }

    #[test]
    fn rejects_empty_history() {
        let record = alice(vec![]);
        assert!(record.validate().is_err());
    }

    #[test]
    fn rejects_history_starting_with_leave() {
        let record = alice(vec![(0, EventKind::Leave)]);
        assert!(record.validate().is_err());
    }

    #[test]
    fn rejects_consecutive_joins() {
        let record = alice(vec![(0, EventKind::Join), (10, EventKind::Join)]);
        assert!(record.validate().is_err());
    }

    #[test]
    fn rejects_regressing_times() {
        let mut record = alice(vec![(10, EventKind::Join)]);
        record.events.push(AttendanceEvent {
            at: at(0),
            kind: EventKind::Leave,
        });
        record.is_present = false;
        assert!(record.validate().is_err());
    }

    #[test]
    fn rejects_stale_presence_flag() {
        let mut record = alice(vec![(0, EventKind::Join), (10, EventKind::Leave)]);
        record.is_present = true;
        assert!(record.validate().is_err());
    }

    #[test]
    fn parse_attendance_update_round_trips() {
        let record = alice(vec![(0, EventKind::Join)]);
        let mut participants = ParticipantMap::new();
        participants.insert("Alice".to_string(), record.clone());
        let params = AttendanceUpdateParams {
            meeting_id: "abc-defg-hij".to_string(),
            action: AttendanceAction::Joined,
            participant: record,
            participants,
            recorded_at: at(0),
        };

        let value = serde_json::to_value(&params).expect("serialize");
        let parsed = parse_attendance_update(value).expect("parse");
        assert_eq!(parsed, params);
    }

    #[test]
    fn parse_attendance_update_rejects_mismatched_map_key() {
        let record = alice(vec![(0, EventKind::Join)]);
        let mut participants = ParticipantMap::new();
        participants.insert("Bob".to_string(), record.clone());
        let params = AttendanceUpdateParams {
            meeting_id: "abc-defg-hij".to_string(),
            action: AttendanceAction::Joined,
            participant: record,
            participants,
            recorded_at: at(0),
        };

        let value = serde_json::to_value(&params).expect("serialize");
        assert!(parse_attendance_update(value).is_err());
    }

    #[test]
    fn parse_meeting_started_rejects_blank_meeting_id() {
        let value = serde_json::json!({
            "meeting_id": "  ",
            "started_at": "2026-03-02T10:00:00Z",
            "url": "https://meet.example.com/abc-defg-hij",
        });
        assert!(parse_meeting_started(value).is_err());
    }

    #[test]
    fn parse_meeting_ended_rejects_long_meeting_id() {
        let value = serde_json::json!({
            "meeting_id": "a".repeat(256),
            "ended_at": "2026-03-02T10:00:00Z",
            "participants": {},
        });
        assert!(parse_meeting_ended(value).is_err());
    }
}
