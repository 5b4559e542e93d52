//! Serialized DOM model and selector matching.
//!
//! The in-page shim spools `PageSnapshot` values as JSON; nothing in this
//! crate ever touches a live DOM. Selector support is intentionally small -
//! a single compound selector (tag, classes, attribute tests) matched against
//! every node in the tree. Descendant combinators have not been needed: the
//! host page is queried by hook attributes, not by structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageSnapshot {
    pub url: String,
    pub captured_at: DateTime<Utc>,
    pub root: DomNode,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DomNode {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<DomNode>,
}

impl DomNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|value| value.split_whitespace().any(|entry| entry == class))
            .unwrap_or(false)
    }

    /// Trimmed own text, `None` when empty or whitespace.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrTest {
    Present,
    Equals(String),
    Contains(String),
}

/// One compound selector: `tag.class[attr=value]` and friends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, AttrTest)>,
}

impl Selector {
    /// Parses a compound selector. Returns `None` for syntax this matcher
    /// does not support (combinators, pseudo-classes, empty input).
    /// Whitespace is only legal inside an attribute value.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        let mut selector = Selector {
            tag: None,
            classes: Vec::new(),
            attrs: Vec::new(),
        };
        let mut rest = input;

        let tag_end = rest
            .find(|c| c == '.' || c == '[')
            .unwrap_or(rest.len());
        if tag_end > 0 {
            let tag = &rest[..tag_end];
            if !is_bare_token(tag) {
                return None;
            }
            selector.tag = Some(tag.to_ascii_lowercase());
        }
        rest = &rest[tag_end..];

        while !rest.is_empty() {
            if let Some(class_rest) = rest.strip_prefix('.') {
                let end = class_rest
                    .find(|c| c == '.' || c == '[')
                    .unwrap_or(class_rest.len());
                let class = &class_rest[..end];
                if !is_bare_token(class) {
                    return None;
                }
                selector.classes.push(class.to_string());
                rest = &class_rest[end..];
            } else if let Some(attr_rest) = rest.strip_prefix('[') {
                let end = attr_rest.find(']')?;
                selector.attrs.push(parse_attr_test(&attr_rest[..end])?);
                rest = &attr_rest[end + 1..];
            } else {
                return None;
            }
        }

        Some(selector)
    }

    pub fn matches(&self, node: &DomNode) -> bool {
        if let Some(tag) = &self.tag {
            if !node.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if !self.classes.iter().all(|class| node.has_class(class)) {
            return false;
        }
        self.attrs.iter().all(|(name, test)| match test {
            AttrTest::Present => node.attr(name).is_some(),
            AttrTest::Equals(expected) => node.attr(name) == Some(expected.as_str()),
            AttrTest::Contains(fragment) => node
                .attr(name)
                .map(|value| value.contains(fragment.as_str()))
                .unwrap_or(false),
        })
    }
}

fn parse_attr_test(body: &str) -> Option<(String, AttrTest)> {
    if let Some((name, value)) = body.split_once("*=") {
        return is_bare_token(name).then(|| (name.to_string(), AttrTest::Contains(unquote(value))));
    }
    if let Some((name, value)) = body.split_once('=') {
        return is_bare_token(name).then(|| (name.to_string(), AttrTest::Equals(unquote(value))));
    }
    is_bare_token(body).then(|| (body.to_string(), AttrTest::Present))
}

/// Tag names, class names, and attribute names: no whitespace, combinators,
/// or pseudo-class syntax.
fn is_bare_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn unquote(value: &str) -> String {
    value
        .trim_matches('"')
        .trim_matches('\'')
        .to_string()
}

/// Depth-first collection of every node matching `selector`.
pub fn query_all<'a>(root: &'a DomNode, selector: &Selector) -> Vec<&'a DomNode> {
    let mut matches = Vec::new();
    collect_matches(root, selector, &mut matches);
    matches
}

pub fn query_first<'a>(root: &'a DomNode, selector: &Selector) -> Option<&'a DomNode> {
    if selector.matches(root) {
        return Some(root);
    }
    root.children
        .iter()
        .find_map(|child| query_first(child, selector))
}

fn collect_matches<'a>(node: &'a DomNode, selector: &Selector, out: &mut Vec<&'a DomNode>) {
    if selector.matches(node) {
        out.push(node);
    }
    for child in &node.children {
        collect_matches(child, selector, out);
    }
}

/// Parses a list of selector strings, dropping (and logging) unsupported
/// entries so one bad selector never disables the others.
pub fn parse_selector_list(inputs: &[&str]) -> Vec<Selector> {
    inputs
        .iter()
        .filter_map(|input| match Selector::parse(input) {
            Some(selector) => Some(selector),
            None => {
                tracing::warn!(selector = %input, "Skipping unsupported selector");
                None
            }
        })
        .collect()
}
