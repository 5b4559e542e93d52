//! SQLite persistence for the session registry.
//!
//! Deliberately small: a sessions table keyed by meeting id with the
//! participant map as a JSON blob, plus a one-row current-session pointer.
//! Attendance updates overwrite the whole map, which is what makes replays
//! harmless.

use chrono::{DateTime, Utc};
use roster_registry_protocol::{
    AttendanceUpdateParams, EventKind, MeetingEndedParams, MeetingStartedParams, ParticipantMap,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

pub struct Store {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionRow {
    pub meeting_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub url: String,
    pub participants: ParticipantMap,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SessionSummary {
    pub meeting_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub url: String,
    pub participant_count: usize,
}

impl Store {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create registry data dir: {}", err))?;
        }
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    meeting_id TEXT PRIMARY KEY,
                    started_at TEXT NOT NULL,
                    ended_at TEXT,
                    url TEXT NOT NULL,
                    participants TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS current_session (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    meeting_id TEXT NOT NULL
                );",
            )
            .map_err(|err| format!("Failed to initialize registry schema: {}", err))
        })
    }

    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let conn = Connection::open(&self.path)
            .map_err(|err| format!("Failed to open registry database: {}", err))?;
        operation(&conn)
    }

    /// Creates or overwrites the session and marks it current.
    pub fn start_session(&self, params: &MeetingStartedParams) -> Result<(), String> {
        let started_at = params.started_at.to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions (meeting_id, started_at, ended_at, url, participants, updated_at)
                 VALUES (?1, ?2, NULL, ?3, '{}', ?2)
                 ON CONFLICT(meeting_id) DO UPDATE SET
                    started_at = excluded.started_at,
                    ended_at = NULL,
                    url = excluded.url,
                    participants = excluded.participants,
                    updated_at = excluded.updated_at",
                params![params.meeting_id, started_at, params.url],
            )
            .map_err(|err| format!("Failed to upsert session: {}", err))?;
            set_current(conn, &params.meeting_id)
        })
    }

    /// Overwrites the participant map. Creates the session row if the start
    /// notification was lost, so replays and out-of-order delivery converge.
    /// The current pointer is only adopted when vacant and the session is
    /// still open; a late replay for a finalized meeting must not steal it.
    pub fn apply_update(&self, update: &AttendanceUpdateParams) -> Result<(), String> {
        let participants = encode_participants(&update.participants)?;
        let recorded_at = update.recorded_at.to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions (meeting_id, started_at, ended_at, url, participants, updated_at)
                 VALUES (?1, ?2, NULL, '', ?3, ?2)
                 ON CONFLICT(meeting_id) DO UPDATE SET
                    participants = excluded.participants,
                    updated_at = excluded.updated_at",
                params![update.meeting_id, recorded_at, participants],
            )
            .map_err(|err| format!("Failed to apply attendance update: {}", err))?;

            if get_current(conn)?.is_none() {
                let ended_at: Option<String> = conn
                    .query_row(
                        "SELECT ended_at FROM sessions WHERE meeting_id = ?1",
                        params![update.meeting_id],
                        |row| row.get(0),
                    )
                    .map_err(|err| format!("Failed to check session end state: {}", err))?;
                if ended_at.is_none() {
                    set_current(conn, &update.meeting_id)?;
                }
            }
            Ok(())
        })
    }

    /// Finalizes the session with the given map and end time, then clears the
    /// current pointer if it points here.
    pub fn end_session(&self, params: &MeetingEndedParams) -> Result<(), String> {
        let participants = encode_participants(&params.participants)?;
        let ended_at = params.ended_at.to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions (meeting_id, started_at, ended_at, url, participants, updated_at)
                 VALUES (?1, ?2, ?2, '', ?3, ?2)
                 ON CONFLICT(meeting_id) DO UPDATE SET
                    ended_at = excluded.ended_at,
                    participants = excluded.participants,
                    updated_at = excluded.updated_at",
                params![params.meeting_id, ended_at, participants],
            )
            .map_err(|err| format!("Failed to finalize session: {}", err))?;

            let current = get_current(conn)?;
            if current.as_deref() == Some(params.meeting_id.as_str()) {
                conn.execute("DELETE FROM current_session", [])
                    .map_err(|err| format!("Failed to clear current session: {}", err))?;
            }
            Ok(())
        })
    }

    pub fn current_meeting(&self) -> Result<Option<String>, String> {
        self.with_connection(get_current)
    }

    pub fn get_session(&self, meeting_id: &str) -> Result<Option<SessionRow>, String> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT meeting_id, started_at, ended_at, url, participants, updated_at
                 FROM sessions WHERE meeting_id = ?1",
                params![meeting_id],
                row_to_session,
            )
            .optional()
            .map_err(|err| format!("Failed to fetch session: {}", err))?
            .transpose()
        })
    }

    pub fn list_summaries(&self) -> Result<Vec<SessionSummary>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT meeting_id, started_at, ended_at, url, participants, updated_at
                     FROM sessions ORDER BY started_at DESC",
                )
                .map_err(|err| format!("Failed to prepare sessions query: {}", err))?;

            let rows = stmt
                .query_map([], row_to_session)
                .map_err(|err| format!("Failed to read session rows: {}", err))?;

            let mut summaries = Vec::new();
            for row in rows {
                let session =
                    row.map_err(|err| format!("Failed to decode session row: {}", err))??;
                summaries.push(SessionSummary {
                    meeting_id: session.meeting_id,
                    started_at: session.started_at,
                    ended_at: session.ended_at,
                    url: session.url,
                    participant_count: session.participants.len(),
                });
            }
            Ok(summaries)
        })
    }

    /// Closes out a session the tracker never finalized (hard kill, machine
    /// crash). Present participants get a trailing leave at the last update
    /// time, mirroring the tracker's own teardown shape.
    pub fn recover_dangling_session(&self) -> Result<Option<String>, String> {
        let Some(meeting_id) = self.current_meeting()? else {
            return Ok(None);
        };
        let Some(session) = self.get_session(&meeting_id)? else {
            self.with_connection(|conn| {
                conn.execute("DELETE FROM current_session", [])
                    .map_err(|err| format!("Failed to clear orphaned pointer: {}", err))
            })?;
            return Ok(None);
        };
        if session.ended_at.is_some() {
            self.with_connection(|conn| {
                conn.execute("DELETE FROM current_session", [])
                    .map_err(|err| format!("Failed to clear stale pointer: {}", err))
            })?;
            return Ok(None);
        }

        let ended_at = parse_rfc3339(&session.updated_at).unwrap_or_else(Utc::now);
        let mut participants = session.participants;
        for record in participants.values_mut() {
            if record.is_present {
                record.events.push(roster_registry_protocol::AttendanceEvent {
                    at: ended_at,
                    kind: EventKind::Leave,
                });
                record.is_present = false;
            }
        }

        self.end_session(&MeetingEndedParams {
            meeting_id: meeting_id.clone(),
            ended_at,
            participants,
        })?;
        Ok(Some(meeting_id))
    }
}

fn set_current(conn: &Connection, meeting_id: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO current_session (id, meeting_id) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET meeting_id = excluded.meeting_id",
        params![meeting_id],
    )
    .map_err(|err| format!("Failed to set current session: {}", err))?;
    Ok(())
}

fn get_current(conn: &Connection) -> Result<Option<String>, String> {
    conn.query_row(
        "SELECT meeting_id FROM current_session WHERE id = 1",
        [],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(|err| format!("Failed to fetch current session: {}", err))
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<SessionRow, String>> {
    let meeting_id: String = row.get(0)?;
    let started_at: String = row.get(1)?;
    let ended_at: Option<String> = row.get(2)?;
    let url: String = row.get(3)?;
    let participants_json: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(decode_participants(&participants_json).map(|participants| SessionRow {
        meeting_id,
        started_at,
        ended_at,
        url,
        participants,
        updated_at,
    }))
}

fn encode_participants(participants: &ParticipantMap) -> Result<String, String> {
    serde_json::to_string(participants)
        .map_err(|err| format!("Failed to serialize participants: {}", err))
}

fn decode_participants(json: &str) -> Result<ParticipantMap, String> {
    serde_json::from_str(json).map_err(|err| format!("Failed to parse participants: {}", err))
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
