//! The presence scanner: one full sweep of a page snapshot.
//!
//! Selectors overlap on purpose - the host page has shipped at least three
//! different participant-tile shapes - so the same participant is routinely
//! sighted more than once per sweep. Sightings merge; they never duplicate.
//! The scanner is snapshot-pure: it reports what it saw and nothing else,
//! leave inference belongs to the reconciler.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::dom::{parse_selector_list, query_all, PageSnapshot, Selector};
use crate::extract::{validate_display_name, Candidate, Extractor};
use crate::roster::Roster;

/// Ordered roster selectors, most reliable first.
static ROSTER_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    parse_selector_list(&[
        "[data-participant-id]",
        "[data-requested-participant-id]",
        "div[role=listitem][aria-label]",
        ".participant-tile",
    ])
});

/// Independent marker for the local user's tile.
static SELF_MARKER_SELECTOR: Lazy<Option<Selector>> =
    Lazy::new(|| Selector::parse("[data-self-name]"));

const SELF_NAME_ATTR: &str = "data-self-name";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sighting {
    pub email: Option<String>,
    pub is_self: bool,
}

/// What one scan observed: name to sighting detail.
pub type ObservedSet = HashMap<String, Sighting>;

#[derive(Default)]
pub struct Scanner {
    extractor: Extractor,
}

impl Scanner {
    /// Sweeps the snapshot with every roster selector, then runs the
    /// self-detection pass. An empty result is a valid observation of an
    /// empty page, not a failure.
    pub fn scan(&self, snapshot: &PageSnapshot, roster: &Roster) -> ObservedSet {
        let mut observed = ObservedSet::new();

        for selector in ROSTER_SELECTORS.iter() {
            for node in query_all(&snapshot.root, selector) {
                if let Some(candidate) = self.extractor.extract(node) {
                    merge_sighting(&mut observed, candidate);
                }
            }
        }

        self.detect_self(snapshot, &mut observed);

        // Once the local user has been identified they are re-asserted into
        // every observation: layout churn hides the self tile constantly and
        // must not read as the local user leaving and rejoining.
        if let Some(self_name) = roster.self_name() {
            observed
                .entry(self_name.to_string())
                .or_insert_with(|| Sighting {
                    email: None,
                    is_self: true,
                })
                .is_self = true;
        }

        observed
    }

    fn detect_self(&self, snapshot: &PageSnapshot, observed: &mut ObservedSet) {
        let Some(selector) = SELF_MARKER_SELECTOR.as_ref() else {
            return;
        };
        for node in query_all(&snapshot.root, selector) {
            let Some(raw) = node.attr(SELF_NAME_ATTR) else {
                continue;
            };
            if let Some(name) = validate_display_name(raw) {
                merge_sighting(
                    observed,
                    Candidate {
                        name,
                        email: None,
                        is_self: true,
                    },
                );
                return;
            }
        }
    }
}

/// Whether the snapshot contains at least one node a roster selector
/// recognizes. Used by warmup to decide the panel has materialized the list.
pub fn has_participant_nodes(snapshot: &PageSnapshot) -> bool {
    ROSTER_SELECTORS
        .iter()
        .any(|selector| !query_all(&snapshot.root, selector).is_empty())
        || SELF_MARKER_SELECTOR
            .as_ref()
            .map(|selector| !query_all(&snapshot.root, selector).is_empty())
            .unwrap_or(false)
}

fn merge_sighting(observed: &mut ObservedSet, candidate: Candidate) {
    let entry = observed.entry(candidate.name).or_default();
    if entry.email.is_none() {
        entry.email = candidate.email;
    }
    entry.is_self |= candidate.is_self;
}
