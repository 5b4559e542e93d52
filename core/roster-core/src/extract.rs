//! Participant extraction from candidate DOM nodes.
//!
//! A node reaches the extractor because some roster selector matched it; that
//! guarantees nothing about its shape. Each strategy is independent of DOM
//! structure and the first success wins. A node that yields no valid name is
//! noise: the extractor returns `None` and never errors, which keeps the
//! scanner's aggregation total.

use crate::dom::{query_first, DomNode, Selector};
use crate::patterns::{RE_EMAIL, RE_OPAQUE_TOKEN, RESERVED_PATH_SEGMENTS};
use once_cell::sync::Lazy;

const MAX_NAME_CHARS: usize = 100;

/// Attribute carrying the participant's display name on the tile itself.
const LABEL_ATTR: &str = "aria-label";
/// Attribute present only on the local user's own tile.
const SELF_NAME_ATTR: &str = "data-self-name";
/// Attributes that carry an email when the host page exposes one.
const EMAIL_ATTRS: &[&str] = &["data-hovercard-id", "data-participant-email"];

/// Inner-text fallbacks, ordered by how reliably they carry the name.
static NAME_TEXT_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    crate::dom::parse_selector_list(&[
        "span.notranslate",
        ".participant-name",
        "[data-participant-name]",
    ])
});

static EMAIL_TEXT_SELECTOR: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("[data-email]"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub email: Option<String>,
    pub is_self: bool,
}

/// One way of pulling a display name out of a candidate node.
pub trait ExtractStrategy: Send + Sync {
    fn label(&self) -> &'static str;
    fn try_extract(&self, node: &DomNode) -> Option<Candidate>;
}

/// Strategy 1: a descriptive attribute on the node itself.
struct LabelAttrStrategy;

impl ExtractStrategy for LabelAttrStrategy {
    fn label(&self) -> &'static str {
        "label-attr"
    }

    fn try_extract(&self, node: &DomNode) -> Option<Candidate> {
        let name = validate_display_name(node.attr(LABEL_ATTR)?)?;
        Some(Candidate {
            name,
            email: None,
            is_self: false,
        })
    }
}

/// Strategy 2: inner text of a known name-bearing child node.
struct ChildTextStrategy;

impl ExtractStrategy for ChildTextStrategy {
    fn label(&self) -> &'static str {
        "child-text"
    }

    fn try_extract(&self, node: &DomNode) -> Option<Candidate> {
        NAME_TEXT_SELECTORS.iter().find_map(|selector| {
            let child = query_first(node, selector)?;
            let name = validate_display_name(child.trimmed_text()?)?;
            Some(Candidate {
                name,
                email: None,
                is_self: false,
            })
        })
    }
}

/// Strategy 3: the dedicated self-name attribute on the local user's tile.
/// Only consulted when the generic strategies fail.
struct SelfNameStrategy;

impl ExtractStrategy for SelfNameStrategy {
    fn label(&self) -> &'static str {
        "self-name-attr"
    }

    fn try_extract(&self, node: &DomNode) -> Option<Candidate> {
        let name = validate_display_name(node.attr(SELF_NAME_ATTR)?)?;
        Some(Candidate {
            name,
            email: None,
            is_self: true,
        })
    }
}

pub struct Extractor {
    strategies: Vec<Box<dyn ExtractStrategy>>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(LabelAttrStrategy),
                Box::new(ChildTextStrategy),
                Box::new(SelfNameStrategy),
            ],
        }
    }
}

impl Extractor {
    /// Runs the strategy chain; first success wins. Email extraction is
    /// independent and optional - its absence never fails a candidate.
    pub fn extract(&self, node: &DomNode) -> Option<Candidate> {
        let mut candidate = self
            .strategies
            .iter()
            .find_map(|strategy| strategy.try_extract(node))?;
        if candidate.email.is_none() {
            candidate.email = extract_email(node);
        }
        if !candidate.is_self && node.attr(SELF_NAME_ATTR).is_some() {
            candidate.is_self = true;
        }
        Some(candidate)
    }
}

/// Trims and validates a raw label as a display name. Rejects length-bound
/// violations and known internal-identifier shapes.
pub fn validate_display_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_CHARS {
        return None;
    }
    if looks_like_internal_id(trimmed) {
        return None;
    }
    Some(trimmed.to_string())
}

fn looks_like_internal_id(value: &str) -> bool {
    if value.starts_with('/') {
        return true;
    }
    if RESERVED_PATH_SEGMENTS
        .iter()
        .any(|segment| value.contains(segment))
    {
        return true;
    }
    RE_OPAQUE_TOKEN.is_match(value)
}

fn extract_email(node: &DomNode) -> Option<String> {
    for attr in EMAIL_ATTRS {
        if let Some(value) = node.attr(attr) {
            let trimmed = value.trim();
            if RE_EMAIL.is_match(trimmed) {
                return Some(trimmed.to_string());
            }
        }
    }
    let selector = EMAIL_TEXT_SELECTOR.as_ref()?;
    let child = query_first(node, selector)?;
    let text = child.trimmed_text()?;
    RE_EMAIL.is_match(text).then(|| text.to_string())
}
