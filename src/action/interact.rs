use super::target::{HighlightTarget, ScrollTarget};
use super::ActionHandler;
use crate::dom::{find_element, DomEventKind, ElementQuery, NodeId};
use crate::error::WidgetError;
use regex::RegexBuilder;
use tracing::info;

impl ActionHandler {
    pub(super) fn locate(&self, query: &ElementQuery) -> Result<NodeId, WidgetError> {
        if query.is_empty() {
            return Err(WidgetError::not_found("empty element query"));
        }
        find_element(self.doc.as_ref(), query).ok_or_else(|| WidgetError::not_found(query.describe()))
    }

    pub(super) fn click(&self, query: &ElementQuery) -> Result<(), WidgetError> {
        let node = self.locate(query)?;
        self.doc.dispatch(node, DomEventKind::Click);
        info!("clicked {}", query.describe());
        Ok(())
    }

    pub(super) fn scroll(&self, target: &ScrollTarget) -> Result<(), WidgetError> {
        let node = if !target.query.is_empty() {
            self.locate(&target.query)?
        } else {
            let direction = target.direction.as_deref().unwrap_or_default().to_ascii_lowercase();
            match direction.as_str() {
                "top" | "up" => self.doc.query_first("body"),
                "bottom" | "down" => self.doc.elements().last().copied(),
                _ => None,
            }
            .ok_or_else(|| WidgetError::not_found("scroll target"))?
        };
        self.doc.scroll_into_view(node, true);
        Ok(())
    }

    pub(super) fn highlight_text(&self, target: &HighlightTarget) -> Result<(), WidgetError> {
        let cleared = self.doc.clear_highlights();
        if cleared > 0 {
            info!("cleared {} previous highlight(s)", cleared);
        }

        let selector = target.selector.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let text = target.exact_text.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let highlighted = match (selector, text) {
            (Some(selector), _) => {
                let nodes = self.doc.query_all(selector);
                for &node in &nodes {
                    self.doc.highlight_element(node);
                }
                nodes
            }
            (None, Some(text)) => {
                let pattern = RegexBuilder::new(&regex::escape(text))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| WidgetError::InvalidTarget(e.to_string()))?;
                self.doc.highlight_text(&pattern)
            }
            (None, None) => {
                return Err(WidgetError::InvalidTarget(
                    "highlight needs a selector or exact_text".into(),
                ))
            }
        };

        let Some(&first) = highlighted.first() else {
            return Err(WidgetError::not_found(selector.or(text).unwrap_or_default()));
        };
        if target.scroll_to {
            self.doc.scroll_into_view(first, true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::harness;
    use crate::api::ChatResponse;
    use crate::dom::{Document, DomEffect, DomEventKind};
    use serde_json::json;

    fn reply(action: &str, context: serde_json::Value) -> ChatResponse {
        ChatResponse {
            answer: String::new(),
            action: Some(action.into()),
            action_context: Some(context),
            url: None,
        }
    }

    #[tokio::test]
    async fn selector_beats_button_text() {
        let h = harness(json!([
            {"tag": "button", "attrs": {"id": "first"}, "children": ["Add to cart"]},
            {"tag": "button", "attrs": {"id": "second"}, "children": ["Checkout"]}
        ]));
        let second = h.page.query_first("#second").unwrap();
        let first = h.page.query_first("#first").unwrap();

        h.handler
            .handle(&reply("click", json!({"selector": "#second", "button_text": "Add to cart"})))
            .await;

        assert_eq!(h.page.events_for(second), vec![DomEventKind::Click]);
        assert!(h.page.events_for(first).is_empty());
    }

    #[tokio::test]
    async fn highlight_wraps_text_and_scrolls_to_it() {
        let h = harness(json!([
            {"tag": "p", "children": ["Free shipping on all orders"]},
            {"tag": "a", "attrs": {"href": "/shipping"}, "children": ["Shipping policy"]}
        ]));
        let handled = h
            .handler
            .handle(&reply("highlight_text", json!({"exact_text": "SHIPPING"})))
            .await;
        assert_eq!(handled, 1);

        let effects = h.page.effects();
        let spans: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                DomEffect::Highlight { node } => Some(*node),
                _ => None,
            })
            .collect();
        assert_eq!(spans.len(), 1);
        assert!(effects.contains(&DomEffect::ScrollIntoView {
            node: spans[0],
            smooth: true
        }));
    }

    #[tokio::test]
    async fn highlight_clears_previous_spans_first() {
        let h = harness(json!([{"tag": "p", "attrs": {"class": "note"}, "children": ["Sale"]}]));
        h.handler.handle(&reply("highlight", json!({"selector": ".note"}))).await;
        h.handler
            .handle(&reply("highlight", json!({"selector": ".note", "scroll_to": false})))
            .await;
        assert!(h
            .page
            .effects()
            .iter()
            .any(|e| matches!(e, DomEffect::ClearHighlights { removed: 1 })));
    }

    #[tokio::test]
    async fn missing_elements_are_log_only() {
        let h = harness(json!([]));
        assert_eq!(h.handler.handle(&reply("click", json!({"button_text": "Buy"}))).await, 0);
        assert_eq!(h.handler.handle(&reply("scroll", json!({}))).await, 0);
        assert!(h.reporter.messages().is_empty());
    }

    #[tokio::test]
    async fn scroll_to_named_element() {
        let h = harness(json!([{"tag": "section", "attrs": {"id": "reviews"}, "children": ["Reviews"]}]));
        let node = h.page.query_first("#reviews").unwrap();
        assert_eq!(h.handler.handle(&reply("scroll", json!({"selector": "#reviews"}))).await, 1);
        assert_eq!(
            h.page.effects(),
            vec![DomEffect::ScrollIntoView { node, smooth: true }]
        );
    }
}
