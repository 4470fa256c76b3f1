use super::{normalize_text, Document, NodeId};
use serde::{Deserialize, Serialize};
use tracing::debug;

const INTERACTIVE: &str =
    "button, a, input[type=submit], input[type=button], input[type=reset], [role=button], summary, label";
const TEXT_FIELDS: &str = "input, textarea";

/// What to look for. Every field is optional; strategies whose field is
/// absent are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementQuery {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub exact_text: Option<String>,
    #[serde(default)]
    pub button_text: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default, alias = "tagName", alias = "tag")]
    pub tag_name: Option<String>,
}

impl ElementQuery {
    pub fn is_empty(&self) -> bool {
        self.selector.is_none()
            && self.exact_text.is_none()
            && self.button_text.is_none()
            && self.role.is_none()
            && self.placeholder.is_none()
    }

    pub fn describe(&self) -> String {
        [
            self.selector.as_deref().map(|s| format!("selector '{}'", s)),
            self.button_text.as_deref().map(|s| format!("button '{}'", s)),
            self.exact_text.as_deref().map(|s| format!("text '{}'", s)),
            self.placeholder.as_deref().map(|s| format!("placeholder '{}'", s)),
            self.role.as_deref().map(|s| format!("role '{}'", s)),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Resolves a query against the document. Strategies run in a fixed
/// order and the first hit wins:
/// selector, interactive text/value/aria-label, placeholder substring,
/// exact full text (optionally scoped to a tag), role attribute.
pub fn find_element(doc: &dyn Document, query: &ElementQuery) -> Option<NodeId> {
    let found = by_selector(doc, query)
        .or_else(|| by_interactive_text(doc, query))
        .or_else(|| by_placeholder(doc, query))
        .or_else(|| by_exact_text(doc, query))
        .or_else(|| by_role(doc, query));
    debug!("find_element({}) -> {:?}", query.describe(), found);
    found
}

fn by_selector(doc: &dyn Document, query: &ElementQuery) -> Option<NodeId> {
    let selector = query.selector.as_deref()?.trim();
    if selector.is_empty() {
        return None;
    }
    doc.query_first(selector)
}

fn by_interactive_text(doc: &dyn Document, query: &ElementQuery) -> Option<NodeId> {
    let needle = query
        .button_text
        .as_deref()
        .or(query.exact_text.as_deref())
        .map(|t| normalize_text(t).to_lowercase())
        .filter(|t| !t.is_empty())?;

    let same = |value: Option<String>| {
        value.is_some_and(|v| normalize_text(&v).to_lowercase() == needle)
    };

    doc.query_all(INTERACTIVE).into_iter().find(|&id| {
        same(Some(doc.text_content(id)))
            || same(doc.value(id))
            || same(doc.attribute(id, "aria-label"))
    })
}

fn by_placeholder(doc: &dyn Document, query: &ElementQuery) -> Option<NodeId> {
    let needle = query.placeholder.as_deref()?.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    doc.query_all(TEXT_FIELDS).into_iter().find(|&id| {
        doc.attribute(id, "placeholder")
            .is_some_and(|p| p.to_lowercase().contains(&needle))
    })
}

fn by_exact_text(doc: &dyn Document, query: &ElementQuery) -> Option<NodeId> {
    let needle = normalize_text(query.exact_text.as_deref()?).to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let scope = query
        .tag_name
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("*");

    let matches: Vec<NodeId> = doc
        .query_all(scope)
        .into_iter()
        .filter(|&id| normalize_text(&doc.text_content(id)).to_lowercase() == needle)
        .collect();

    // Wrappers share their only child's text; prefer the innermost element.
    matches.iter().copied().find(|&candidate| {
        let inner = doc.query_within(candidate, "*");
        !matches.iter().any(|m| inner.contains(m))
    })
}

fn by_role(doc: &dyn Document, query: &ElementQuery) -> Option<NodeId> {
    let role = query.role.as_deref()?.trim();
    if role.is_empty() || role.contains(['"', '\\']) {
        return None;
    }
    doc.query_first(&format!("[role=\"{}\"]", role))
}
