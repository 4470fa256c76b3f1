//! Queryable document abstraction the action handlers run against.
//!
//! The live storefront page is mirrored into a [`Page`]; every mutation an
//! action performs is recorded as a [`DomEffect`] and streamed to the shim
//! that applies it to the real DOM.

pub mod locator;
pub mod page;
pub mod selector;

pub use locator::{find_element, ElementQuery};
pub use page::{Page, PageSnapshot, SnapshotNode};

use regex::Regex;
use serde::{Deserialize, Serialize};

pub type NodeId = usize;

pub const HIGHLIGHT_ATTR: &str = "data-voicero-highlight";
pub const HIGHLIGHT_ELEMENT_ATTR: &str = "data-voicero-highlight-el";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomEventKind {
    Click,
    Input,
    Change,
    Submit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomEffect {
    Event {
        node: NodeId,
        event: DomEventKind,
        bubbles: bool,
        cancelable: bool,
    },
    SetValue {
        node: NodeId,
        value: String,
    },
    SetChecked {
        node: NodeId,
        checked: bool,
    },
    ScrollIntoView {
        node: NodeId,
        smooth: bool,
    },
    Highlight {
        node: NodeId,
    },
    ClearHighlights {
        removed: usize,
    },
}

pub trait Document: Send + Sync {
    /// Address of the loaded page, when known.
    fn url(&self) -> Option<String>;

    /// All elements matching `selector`, in document order. An invalid
    /// selector matches nothing.
    fn query_all(&self, selector: &str) -> Vec<NodeId>;

    /// Descendants of `root` matching `selector`.
    fn query_within(&self, root: NodeId, selector: &str) -> Vec<NodeId>;

    /// Every attached element, in document order.
    fn elements(&self) -> Vec<NodeId>;

    fn tag_name(&self, node: NodeId) -> Option<String>;
    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;
    fn text_content(&self, node: NodeId) -> String;
    fn value(&self, node: NodeId) -> Option<String>;
    fn checked(&self, node: NodeId) -> bool;
    fn is_visible(&self, node: NodeId) -> bool;

    /// `node` itself or its nearest ancestor matching `selector`.
    fn closest(&self, node: NodeId, selector: &str) -> Option<NodeId>;

    fn set_value(&self, node: NodeId, value: &str);
    fn set_checked(&self, node: NodeId, checked: bool);

    /// Dispatches a synthetic bubbling, cancelable event.
    fn dispatch(&self, node: NodeId, event: DomEventKind);

    fn scroll_into_view(&self, node: NodeId, smooth: bool);
    fn highlight_element(&self, node: NodeId);

    /// Wraps every match of `pattern` inside visible text nodes (outside
    /// script/style/title/noscript/anchor) in a highlight span. Returns the
    /// spans created, in document order.
    fn highlight_text(&self, pattern: &Regex) -> Vec<NodeId>;

    /// Removes every highlight applied so far. Returns how many were removed.
    fn clear_highlights(&self) -> usize;

    fn query_first(&self, selector: &str) -> Option<NodeId> {
        self.query_all(selector).into_iter().next()
    }
}

/// Collapses runs of whitespace and trims.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
