//! The participant map and the event reconciler.
//!
//! `reconcile` is the only writer of attendance history. Each participant's
//! transition depends only on their own record and the observed set, which is
//! what keeps reconciliation race-free under the single-consumer model: no
//! sorting, no cross-participant state, linear in map plus observation size.

use chrono::{DateTime, Utc};
use roster_registry_protocol::{
    AttendanceAction, AttendanceEvent, EventKind, ParticipantMap, ParticipantRecord,
};

use crate::scanner::ObservedSet;

#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: ParticipantMap,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn participants(&self) -> &ParticipantMap {
        &self.participants
    }

    /// Deep copy for handing across the registry boundary. The registry never
    /// sees a live reference.
    pub fn snapshot(&self) -> ParticipantMap {
        self.participants.clone()
    }

    pub fn get(&self, name: &str) -> Option<&ParticipantRecord> {
        self.participants.get(name)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn present_count(&self) -> usize {
        self.participants
            .values()
            .filter(|record| record.is_present)
            .count()
    }

    pub fn self_name(&self) -> Option<&str> {
        self.participants
            .values()
            .find(|record| record.is_self)
            .map(|record| record.name.as_str())
    }
}

/// One transition applied by the reconciler, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterChange {
    pub name: String,
    pub action: AttendanceAction,
}

/// Diffs the observed set against the roster and applies join/rejoin/leave
/// transitions. Returns the transitions so callers can notify without
/// re-diffing. Repeating the same observation is a no-op.
pub fn reconcile(roster: &mut Roster, observed: &ObservedSet, now: DateTime<Utc>) -> Vec<RosterChange> {
    let mut changes = Vec::new();

    for (name, sighting) in observed {
        match roster.participants.get_mut(name) {
            None => {
                roster.participants.insert(
                    name.clone(),
                    ParticipantRecord::joined(
                        name.clone(),
                        sighting.email.clone(),
                        sighting.is_self,
                        now,
                    ),
                );
                changes.push(RosterChange {
                    name: name.clone(),
                    action: AttendanceAction::Joined,
                });
            }
            Some(record) => {
                if sighting.is_self && !record.is_self {
                    record.is_self = true;
                }
                if !record.is_present {
                    record.events.push(AttendanceEvent {
                        at: now,
                        kind: EventKind::Join,
                    });
                    record.is_present = true;
                    enrich_email(record, sighting.email.as_deref());
                    changes.push(RosterChange {
                        name: name.clone(),
                        action: AttendanceAction::Rejoined,
                    });
                } else if enrich_email(record, sighting.email.as_deref()) {
                    // Silent mutation: no attendance event, but worth a
                    // registry notification so the mirror picks it up.
                    changes.push(RosterChange {
                        name: name.clone(),
                        action: AttendanceAction::EmailAdded,
                    });
                }
            }
        }
    }

    for (name, record) in roster.participants.iter_mut() {
        if record.is_present && !observed.contains_key(name) {
            record.events.push(AttendanceEvent {
                at: now,
                kind: EventKind::Leave,
            });
            record.is_present = false;
            changes.push(RosterChange {
                name: name.clone(),
                action: AttendanceAction::Left,
            });
        }
    }

    changes
}

/// Appends a synthetic Leave for every participant still present. Used when
/// the session ends, whatever ended it - the finalized shape is identical for
/// internal end signals and forced teardown.
pub fn flush_leaves(roster: &mut Roster, at: DateTime<Utc>) -> Vec<RosterChange> {
    let mut changes = Vec::new();
    for (name, record) in roster.participants.iter_mut() {
        if record.is_present {
            record.events.push(AttendanceEvent {
                at,
                kind: EventKind::Leave,
            });
            record.is_present = false;
            changes.push(RosterChange {
                name: name.clone(),
                action: AttendanceAction::Left,
            });
        }
    }
    changes
}

/// Email is set once and never cleared or overwritten.
fn enrich_email(record: &mut ParticipantRecord, email: Option<&str>) -> bool {
    let has_email = record
        .email
        .as_deref()
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if has_email {
        return false;
    }
    match email.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => {
            record.email = Some(value.to_string());
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Sighting;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, secs).unwrap()
    }

    fn observed(names: &[&str]) -> ObservedSet {
        names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    Sighting {
                        email: None,
                        is_self: false,
                    },
                )
            })
            .collect()
    }

    fn observed_with_email(name: &str, email: &str) -> ObservedSet {
        let mut set = ObservedSet::new();
        set.insert(
            name.to_string(),
            Sighting {
                email: Some(email.to_string()),
                is_self: false,
            },
        );
        set
    }

    fn kinds(roster: &Roster, name: &str) -> Vec<EventKind> {
        roster
            .get(name)
            .expect("record")
            .events
            .iter()
            .map(|event| event.kind)
            .collect()
    }

    #[test]
    fn first_sighting_creates_record_with_join() {
        let mut roster = Roster::new();
        let changes = reconcile(&mut roster, &observed(&["Alice"]), at(1));

        assert_eq!(
            changes,
            vec![RosterChange {
                name: "Alice".to_string(),
                action: AttendanceAction::Joined,
            }]
        );
        let record = roster.get("Alice").expect("record");
        assert!(record.is_present);
        assert_eq!(record.events.len(), 1);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn repeated_observation_is_idempotent() {
        let mut roster = Roster::new();
        reconcile(&mut roster, &observed(&["Alice"]), at(1));
        let before = roster.snapshot();

        let changes = reconcile(&mut roster, &observed(&["Alice"]), at(2));
        assert!(changes.is_empty());
        assert_eq!(roster.snapshot(), before);
    }

    #[test]
    fn disappearance_appends_one_leave_then_noop() {
        let mut roster = Roster::new();
        reconcile(&mut roster, &observed(&["Bob"]), at(1));

        let changes = reconcile(&mut roster, &observed(&[]), at(2));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, AttendanceAction::Left);
        assert_eq!(kinds(&roster, "Bob"), vec![EventKind::Join, EventKind::Leave]);

        let changes = reconcile(&mut roster, &observed(&[]), at(3));
        assert!(changes.is_empty());
        assert_eq!(roster.get("Bob").expect("record").events.len(), 2);
    }

    #[test]
    fn rejoin_appends_join_to_existing_record() {
        let mut roster = Roster::new();
        reconcile(&mut roster, &observed(&["Alice"]), at(1));
        reconcile(&mut roster, &observed(&[]), at(2));

        let changes = reconcile(&mut roster, &observed(&["Alice"]), at(3));
        assert_eq!(changes[0].action, AttendanceAction::Rejoined);

        let record = roster.get("Alice").expect("record");
        assert_eq!(
            kinds(&roster, "Alice"),
            vec![EventKind::Join, EventKind::Leave, EventKind::Join]
        );
        assert!(record.is_present);
        assert_eq!(record.join_count(), 2);
        assert_eq!(roster.len(), 1, "rejoin must not create a second record");
    }

    #[test]
    fn email_enrichment_is_silent_on_history() {
        let mut roster = Roster::new();
        reconcile(&mut roster, &observed(&["Carol"]), at(1));

        let changes = reconcile(&mut roster, &observed_with_email("Carol", "c@x.com"), at(2));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, AttendanceAction::EmailAdded);

        let record = roster.get("Carol").expect("record");
        assert_eq!(record.email.as_deref(), Some("c@x.com"));
        assert_eq!(record.events.len(), 1, "enrichment must not append events");
    }

    #[test]
    fn email_is_never_overwritten() {
        let mut roster = Roster::new();
        reconcile(&mut roster, &observed_with_email("Carol", "c@x.com"), at(1));

        let changes = reconcile(&mut roster, &observed_with_email("Carol", "other@x.com"), at(2));
        assert!(changes.is_empty());
        assert_eq!(
            roster.get("Carol").expect("record").email.as_deref(),
            Some("c@x.com")
        );
    }

    #[test]
    fn flush_leaves_only_touches_present_participants() {
        let mut roster = Roster::new();
        reconcile(&mut roster, &observed(&["A", "B"]), at(1));
        reconcile(&mut roster, &observed(&["A"]), at(2));

        let changes = flush_leaves(&mut roster, at(10));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, "A");

        let a = roster.get("A").expect("record");
        assert_eq!(a.events.last().expect("event").at, at(10));
        assert!(!a.is_present);
        let b = roster.get("B").expect("record");
        assert_eq!(b.events.len(), 2, "absent participant history untouched");
    }

    #[test]
    fn histories_always_alternate_and_presence_matches_last_event() {
        let mut roster = Roster::new();
        let steps: Vec<(u32, Vec<&str>)> = vec![
            (1, vec!["Alice"]),
            (2, vec!["Alice", "Bob"]),
            (3, vec![]),
            (4, vec!["Alice"]),
            (5, vec!["Alice", "Bob"]),
            (6, vec!["Bob"]),
        ];
        for (secs, names) in steps {
            reconcile(&mut roster, &observed(&names), at(secs));
            for record in roster.participants().values() {
                record.validate().expect("invariants hold after every scan");
            }
        }
        assert_eq!(roster.get("Alice").expect("record").join_count(), 2);
        assert_eq!(roster.get("Bob").expect("record").join_count(), 2);
    }
}
