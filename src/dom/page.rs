use super::selector::{SelectorList, SelectorSubject};
use super::{
    normalize_text, Document, DomEffect, DomEventKind, NodeId, HIGHLIGHT_ATTR,
    HIGHLIGHT_ELEMENT_ATTR,
};
use crate::bus::{Event, EventBus};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

const SKIP_TEXT_IN: &[&str] = &["script", "style", "title", "noscript", "a"];

/// Serialized page content posted by the storefront shim. Strings are text
/// nodes, objects are elements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub body: Vec<SnapshotNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotNode {
    Text(String),
    Element {
        tag: String,
        #[serde(default)]
        attrs: BTreeMap<String, String>,
        #[serde(default)]
        children: Vec<SnapshotNode>,
    },
}

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        value: Option<String>,
        checked: bool,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
    url: Option<String>,
}

const ROOT: NodeId = 0;

impl Tree {
    fn from_snapshot(snapshot: &PageSnapshot) -> Self {
        let mut tree = Tree {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Element {
                    tag: "body".to_string(),
                    attrs: BTreeMap::new(),
                    value: None,
                    checked: false,
                },
            }],
            url: snapshot.url.clone(),
        };
        for child in &snapshot.body {
            tree.append(ROOT, child);
        }
        tree
    }

    fn append(&mut self, parent: NodeId, snapshot: &SnapshotNode) {
        let data = match snapshot {
            SnapshotNode::Text(text) => NodeData::Text(text.clone()),
            SnapshotNode::Element { tag, attrs, .. } => {
                let attrs: BTreeMap<String, String> = attrs
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                    .collect();
                NodeData::Element {
                    tag: tag.to_ascii_lowercase(),
                    value: attrs.get("value").cloned(),
                    checked: attrs.contains_key("checked"),
                    attrs,
                }
            }
        };
        let id = self.push(parent, data);
        if let SnapshotNode::Element { children, .. } = snapshot {
            for child in children {
                self.append(id, child);
            }
        }
    }

    fn push(&mut self, parent: NodeId, data: NodeData) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            data,
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id).map(|n| &n.data), Some(NodeData::Element { .. }))
    }

    /// Attached nodes below `root` in document order, `root` excluded.
    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[root].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        out
    }

    fn element_descendants(&self, root: NodeId) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|&id| self.is_element(id))
            .collect()
    }

    fn text(&self, id: NodeId) -> String {
        match &self.nodes[id].data {
            NodeData::Text(text) => text.clone(),
            NodeData::Element { .. } => self
                .descendants(id)
                .into_iter()
                .filter_map(|d| match &self.nodes[d].data {
                    NodeData::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes.get(id).and_then(|n| n.parent), move |&p| {
            self.nodes[p].parent
        })
    }

    fn hides_itself(&self, id: NodeId) -> bool {
        let NodeData::Element { tag, attrs, .. } = &self.nodes[id].data else {
            return false;
        };
        if attrs.contains_key("hidden") {
            return true;
        }
        if tag == "input" && attrs.get("type").map(String::as_str) == Some("hidden") {
            return true;
        }
        attrs
            .get("style")
            .map(|style| {
                let compact: String = style.chars().filter(|c| !c.is_whitespace()).collect();
                compact.contains("display:none") || compact.contains("visibility:hidden")
            })
            .unwrap_or(false)
    }

    fn visible(&self, id: NodeId) -> bool {
        !self.hides_itself(id) && self.ancestors(id).all(|a| !self.hides_itself(a))
    }

    fn attr_mut(&mut self, id: NodeId) -> Option<&mut BTreeMap<String, String>> {
        match self.nodes.get_mut(id).map(|n| &mut n.data) {
            Some(NodeData::Element { attrs, .. }) => Some(attrs),
            _ => None,
        }
    }

    /// Replaces `old` in its parent's child list with `replacements`.
    fn replace_child(&mut self, old: NodeId, replacements: Vec<NodeId>) {
        let Some(parent) = self.nodes[old].parent else {
            return;
        };
        for &r in &replacements {
            self.nodes[r].parent = Some(parent);
        }
        let children = &mut self.nodes[parent].children;
        if let Some(pos) = children.iter().position(|&c| c == old) {
            let tail = children.split_off(pos + 1);
            children.truncate(pos);
            children.extend(replacements);
            children.extend(tail);
        }
        self.nodes[old].parent = None;
    }

    fn new_detached(&mut self, data: NodeData) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data,
        });
        id
    }
}

impl SelectorSubject for Tree {
    fn tag(&self, id: NodeId) -> Option<&str> {
        match self.nodes.get(id).map(|n| &n.data) {
            Some(NodeData::Element { tag, .. }) => Some(tag.as_str()),
            _ => None,
        }
    }

    fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.nodes.get(id).map(|n| &n.data) {
            Some(NodeData::Element { attrs, .. }) => attrs.get(name).map(String::as_str),
            _ => None,
        }
    }

    fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }
}

/// In-memory mirror of the storefront page.
pub struct Page {
    tree: RwLock<Tree>,
    effects: Mutex<Vec<DomEffect>>,
    bus: Option<Arc<EventBus>>,
}

impl Page {
    pub fn new(snapshot: &PageSnapshot) -> Self {
        Self {
            tree: RwLock::new(Tree::from_snapshot(snapshot)),
            effects: Mutex::new(Vec::new()),
            bus: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(&PageSnapshot::default())
    }

    /// Convenience for building pages from `serde_json::json!` literals.
    pub fn from_json(value: serde_json::Value) -> anyhow::Result<Self> {
        let snapshot: PageSnapshot = serde_json::from_value(value)?;
        Ok(Self::new(&snapshot))
    }

    /// Publish every recorded effect on `bus` as well.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Replaces the content after a navigation. Recorded effects are kept.
    pub fn load(&self, snapshot: &PageSnapshot) {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        *tree = Tree::from_snapshot(snapshot);
        debug!("page loaded: {:?}", snapshot.url);
    }

    pub fn effects(&self) -> Vec<DomEffect> {
        self.effects.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events_for(&self, node: NodeId) -> Vec<DomEventKind> {
        self.effects()
            .into_iter()
            .filter_map(|e| match e {
                DomEffect::Event { node: n, event, .. } if n == node => Some(event),
                _ => None,
            })
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, effect: DomEffect) {
        self.effects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(effect.clone());
        if let Some(bus) = &self.bus {
            bus.publish(Event::Dom(effect));
        }
    }

    fn parse(selector: &str) -> Option<SelectorList> {
        match selector.parse::<SelectorList>() {
            Ok(list) => Some(list),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }
}

impl Document for Page {
    fn url(&self) -> Option<String> {
        self.read().url.clone()
    }

    fn query_all(&self, selector: &str) -> Vec<NodeId> {
        let Some(list) = Self::parse(selector) else {
            return Vec::new();
        };
        let tree = self.read();
        std::iter::once(ROOT)
            .chain(tree.element_descendants(ROOT))
            .filter(|&id| list.matches(&*tree, id))
            .collect()
    }

    fn query_within(&self, root: NodeId, selector: &str) -> Vec<NodeId> {
        let Some(list) = Self::parse(selector) else {
            return Vec::new();
        };
        let tree = self.read();
        if root >= tree.nodes.len() {
            return Vec::new();
        }
        tree.element_descendants(root)
            .into_iter()
            .filter(|&id| list.matches(&*tree, id))
            .collect()
    }

    fn elements(&self) -> Vec<NodeId> {
        self.read().element_descendants(ROOT)
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.read().tag(node).map(str::to_string)
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.read().attr(node, name).map(str::to_string)
    }

    fn text_content(&self, node: NodeId) -> String {
        let tree = self.read();
        if node >= tree.nodes.len() {
            return String::new();
        }
        tree.text(node)
    }

    fn value(&self, node: NodeId) -> Option<String> {
        match self.read().nodes.get(node).map(|n| &n.data) {
            Some(NodeData::Element { value, .. }) => value.clone(),
            _ => None,
        }
    }

    fn checked(&self, node: NodeId) -> bool {
        matches!(
            self.read().nodes.get(node).map(|n| &n.data),
            Some(NodeData::Element { checked: true, .. })
        )
    }

    fn is_visible(&self, node: NodeId) -> bool {
        let tree = self.read();
        node < tree.nodes.len() && tree.visible(node)
    }

    fn closest(&self, node: NodeId, selector: &str) -> Option<NodeId> {
        let list = Self::parse(selector)?;
        let tree = self.read();
        if node >= tree.nodes.len() {
            return None;
        }
        let found = std::iter::once(node)
            .chain(tree.ancestors(node))
            .find(|&id| list.matches(&*tree, id));
        found
    }

    fn set_value(&self, node: NodeId, new_value: &str) {
        {
            let mut tree = self.write();
            match tree.nodes.get_mut(node).map(|n| &mut n.data) {
                Some(NodeData::Element { value, .. }) => *value = Some(new_value.to_string()),
                _ => return,
            }
        }
        self.record(DomEffect::SetValue {
            node,
            value: new_value.to_string(),
        });
    }

    fn set_checked(&self, node: NodeId, state: bool) {
        {
            let mut tree = self.write();
            match tree.nodes.get_mut(node).map(|n| &mut n.data) {
                Some(NodeData::Element { checked, .. }) => *checked = state,
                _ => return,
            }
        }
        self.record(DomEffect::SetChecked {
            node,
            checked: state,
        });
    }

    fn dispatch(&self, node: NodeId, event: DomEventKind) {
        self.record(DomEffect::Event {
            node,
            event,
            bubbles: true,
            cancelable: true,
        });
    }

    fn scroll_into_view(&self, node: NodeId, smooth: bool) {
        self.record(DomEffect::ScrollIntoView { node, smooth });
    }

    fn highlight_element(&self, node: NodeId) {
        {
            let mut tree = self.write();
            let Some(attrs) = tree.attr_mut(node) else {
                return;
            };
            attrs.insert(HIGHLIGHT_ELEMENT_ATTR.to_string(), "true".to_string());
        }
        self.record(DomEffect::Highlight { node });
    }

    fn highlight_text(&self, pattern: &Regex) -> Vec<NodeId> {
        let mut spans = Vec::new();
        {
            let mut tree = self.write();
            let candidates: Vec<NodeId> = tree
                .descendants(ROOT)
                .into_iter()
                .filter(|&id| matches!(tree.nodes[id].data, NodeData::Text(_)))
                .filter(|&id| tree.visible(id))
                .filter(|&id| {
                    tree.ancestors(id).all(|a| {
                        let skipped = tree.tag(a).is_some_and(|t| SKIP_TEXT_IN.contains(&t));
                        !skipped && tree.attr(a, HIGHLIGHT_ATTR).is_none()
                    })
                })
                .collect();

            for id in candidates {
                let NodeData::Text(text) = tree.nodes[id].data.clone() else {
                    continue;
                };
                if normalize_text(&text).is_empty() || !pattern.is_match(&text) {
                    continue;
                }

                let mut pieces = Vec::new();
                let mut last = 0;
                for m in pattern.find_iter(&text) {
                    if m.start() == m.end() {
                        continue;
                    }
                    if m.start() > last {
                        pieces.push(tree.new_detached(NodeData::Text(text[last..m.start()].to_string())));
                    }
                    let span = tree.new_detached(NodeData::Element {
                        tag: "span".to_string(),
                        attrs: BTreeMap::from([
                            ("class".to_string(), "voicero-highlight".to_string()),
                            (HIGHLIGHT_ATTR.to_string(), "true".to_string()),
                        ]),
                        value: None,
                        checked: false,
                    });
                    let inner = tree.new_detached(NodeData::Text(m.as_str().to_string()));
                    tree.nodes[inner].parent = Some(span);
                    tree.nodes[span].children.push(inner);
                    pieces.push(span);
                    spans.push(span);
                    last = m.end();
                }
                if last < text.len() {
                    pieces.push(tree.new_detached(NodeData::Text(text[last..].to_string())));
                }
                tree.replace_child(id, pieces);
            }
        }

        for &span in &spans {
            self.record(DomEffect::Highlight { node: span });
        }
        spans
    }

    fn clear_highlights(&self) -> usize {
        let removed = {
            let mut tree = self.write();
            let highlighted: Vec<NodeId> = tree
                .element_descendants(ROOT)
                .into_iter()
                .filter(|&id| {
                    tree.attr(id, HIGHLIGHT_ATTR).is_some()
                        || tree.attr(id, HIGHLIGHT_ELEMENT_ATTR).is_some()
                })
                .collect();

            for &id in &highlighted {
                if tree.attr(id, HIGHLIGHT_ATTR).is_some() {
                    let children = std::mem::take(&mut tree.nodes[id].children);
                    tree.replace_child(id, children);
                } else if let Some(attrs) = tree.attr_mut(id) {
                    attrs.remove(HIGHLIGHT_ELEMENT_ATTR);
                }
            }
            highlighted.len()
        };

        if removed > 0 {
            self.record(DomEffect::ClearHighlights { removed });
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page() -> Page {
        Page::from_json(json!({
            "url": "https://shop.example/products/tee",
            "body": [
                {"tag": "h1", "children": ["Classic Tee"]},
                {"tag": "p", "attrs": {"id": "desc"}, "children": ["Soft cotton tee. Machine wash cold."]},
                {"tag": "script", "children": ["var tee = 1;"]},
                {"tag": "a", "attrs": {"href": "/tee"}, "children": ["tee link"]},
                {"tag": "div", "attrs": {"style": "display: none"}, "children": [
                    {"tag": "span", "children": ["hidden tee"]}
                ]},
                {"tag": "input", "attrs": {"type": "checkbox", "name": "gift", "checked": ""}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn snapshot_builds_queryable_tree() {
        let page = page();
        let h1 = page.query_first("h1").unwrap();
        assert_eq!(page.text_content(h1), "Classic Tee");
        assert_eq!(page.url().as_deref(), Some("https://shop.example/products/tee"));
        let gift = page.query_first("input[name=gift]").unwrap();
        assert!(page.checked(gift));
        let hidden = page.query_first("div span").unwrap();
        assert!(!page.is_visible(hidden));
        assert_eq!(page.closest(hidden, "div"), page.query_first("div"));
    }

    #[test]
    fn highlights_only_visible_plain_text_and_clears() {
        let page = page();
        let pattern = Regex::new("(?i)tee").unwrap();
        let spans = page.highlight_text(&pattern);

        // h1 "Tee" and p "tee"; script, anchor and hidden div are skipped
        assert_eq!(spans.len(), 2);
        let desc = page.query_first("#desc").unwrap();
        assert_eq!(page.text_content(desc), "Soft cotton tee. Machine wash cold.");
        assert_eq!(page.query_within(desc, "span.voicero-highlight").len(), 1);

        assert_eq!(page.clear_highlights(), 2);
        assert!(page.query_all("span.voicero-highlight").is_empty());
        assert_eq!(page.text_content(desc), "Soft cotton tee. Machine wash cold.");
    }

    #[test]
    fn mutations_are_recorded_as_effects() {
        let page = page();
        let gift = page.query_first("input[name=gift]").unwrap();
        page.set_checked(gift, false);
        page.dispatch(gift, DomEventKind::Change);
        assert!(!page.checked(gift));
        assert_eq!(page.events_for(gift), vec![DomEventKind::Change]);
        assert_eq!(
            page.effects()[0],
            DomEffect::SetChecked {
                node: gift,
                checked: false
            }
        );
    }

    #[test]
    fn invalid_selector_matches_nothing() {
        assert!(page().query_all("a:hover").is_empty());
    }
}
