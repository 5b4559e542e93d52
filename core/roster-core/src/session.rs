//! Meeting session state and URL parsing.

use chrono::{DateTime, Utc};

use crate::patterns::RE_MEETING_CODE;
use crate::roster::{flush_leaves, Roster, RosterChange};

/// Extracts the meeting code from a page URL, if the URL is inside a meeting.
/// The landing page, pre-join screens without a code, and arbitrary other
/// pages all yield `None`.
pub fn meeting_code_from_url(url: &str) -> Option<String> {
    RE_MEETING_CODE
        .captures(url)
        .map(|caps| caps[1].to_string())
}

/// One tracked meeting occurrence. Exclusively owned by the lifecycle
/// controller; the registry only ever receives snapshots.
#[derive(Debug, Clone)]
pub struct MeetingSession {
    pub meeting_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Page URL at session start. Diagnostic only.
    pub url: String,
    pub roster: Roster,
}

impl MeetingSession {
    pub fn begin(meeting_id: String, url: String, now: DateTime<Utc>) -> Self {
        Self {
            meeting_id,
            started_at: now,
            ended_at: None,
            url,
            roster: Roster::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Closes the session: flushes a trailing Leave for everyone still
    /// present and stamps the end time. Idempotent - a second call changes
    /// nothing and returns no changes.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> Vec<RosterChange> {
        if self.ended_at.is_some() {
            return Vec::new();
        }
        let changes = flush_leaves(&mut self.roster, now);
        self.ended_at = Some(now);
        changes
    }
}
