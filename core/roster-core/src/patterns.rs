//! Compiled regex patterns for meeting URLs and participant-node filtering.
//!
//! These patterns are compiled once on first use and reused throughout the
//! detection core. Update these when the host page changes its URL scheme or
//! its internal identifier shapes.

use once_cell::sync::Lazy;
use regex::Regex;

/// Meeting code as it appears in the page URL path (e.g. "abc-defg-hij").
pub static RE_MEETING_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/([a-z]{3}-[a-z]{4,5}-[a-z]{3})(?:[/?#]|$)").unwrap());

/// Opaque internal identifiers the host page puts in accessible labels when a
/// display name is missing. Never a human name.
pub static RE_OPAQUE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]{20,}$").unwrap());

pub static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

/// Path segments that mark a label as an internal resource path rather than a
/// display name (participant ids look like "spaces/<id>/devices/<id>").
pub const RESERVED_PATH_SEGMENTS: &[&str] = &["spaces/", "devices/"];
