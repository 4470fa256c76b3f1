use super::conversation::{Conversation, SendOutcome};
use super::ui::{Interface, UiController, UiState};
use super::follow_up;
use crate::action::ActionHandler;
use crate::api::MessageKind;
use crate::returns::ReturnOrchestrator;
use std::sync::Arc;

pub struct TextWidget {
    conversation: Arc<Conversation>,
    ui: Arc<UiController>,
    actions: Arc<ActionHandler>,
    returns: Arc<ReturnOrchestrator>,
}

impl TextWidget {
    pub fn new(
        conversation: Arc<Conversation>,
        ui: Arc<UiController>,
        actions: Arc<ActionHandler>,
        returns: Arc<ReturnOrchestrator>,
    ) -> Self {
        Self {
            conversation,
            ui,
            actions,
            returns,
        }
    }

    pub fn conversation(&self) -> &Arc<Conversation> {
        &self.conversation
    }

    pub fn open(&self) -> UiState {
        self.ui.open(Interface::Text, self.conversation.has_messages())
    }

    pub fn minimize(&self) -> UiState {
        self.ui.minimize(Interface::Text)
    }

    pub fn maximize(&self) -> UiState {
        self.ui.maximize(Interface::Text)
    }

    /// Closing drops any reply still on its way.
    pub fn close(&self) {
        self.conversation.cancel_pending();
        self.ui.close(Interface::Text);
    }

    /// Render, ask, render the answer, act on it, then navigate.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let Some(turn) = self.conversation.begin(text) else {
            return SendOutcome::Rejected;
        };

        if self.returns.has_pending() && self.returns.resume(turn.text()).await.is_some() {
            return SendOutcome::HandledLocally;
        }

        let outcome = self.conversation.exchange(turn, MessageKind::Text).await;
        if let SendOutcome::Answered(response) = &outcome {
            follow_up(&self.actions, response).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_config;
    use super::super::voice::tests::{ScriptedPlayer, ScriptedRecorder};
    use super::super::{Widget, WidgetParts};
    use super::*;
    use crate::bus::{drain, Event, EventBus};
    use crate::chat::Role;
    use crate::customer::PageContext;
    use crate::dom::Page;
    use crate::storage::MemoryStorage;
    use crate::testing::{MockBackend, MockStorefront};
    use serde_json::json;

    fn widget(backend: Arc<MockBackend>, bus: Arc<EventBus>, context: PageContext) -> Widget {
        Widget::new(
            &test_config(),
            WidgetParts {
                backend,
                storefront: Arc::new(MockStorefront::default()),
                storage: Arc::new(MemoryStorage::new()),
                doc: Arc::new(Page::empty()),
                bus,
                recorder: Arc::new(ScriptedRecorder::default()),
                player: Arc::new(ScriptedPlayer::default()),
                context,
                cached_threads: Vec::new(),
            },
        )
    }

    fn navigations(events: Vec<Event>) -> Vec<String> {
        events
            .into_iter()
            .filter_map(|e| match e {
                Event::Navigate { url } => Some(url),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn redirect_reply_round_trip() {
        let backend = Arc::new(MockBackend::default());
        backend.queue_chat(json!({
            "threadId": "t1",
            "response": {"answer": "Hi", "action": "redirect", "url": "/cart"}
        }));
        let bus = Arc::new(EventBus::new());
        let widget = widget(backend.clone(), bus.clone(), PageContext::default());
        let mut rx = bus.subscribe();
        widget.text().open();

        let outcome = widget.text().send("take me to my cart").await;

        assert!(matches!(outcome, SendOutcome::Answered(_)));
        let chat = widget.text().conversation();
        let messages = chat.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi");
        assert_eq!(chat.thread_id().as_deref(), Some("t1"));
        assert_eq!(navigations(drain(&mut rx)), vec!["https://shop.example/cart"]);
    }

    #[tokio::test]
    async fn answer_links_are_followed_after_rendering() {
        let backend = Arc::new(MockBackend::default());
        backend.queue_chat(json!({
            "response": {"answer": "Our policy is on [this page](/policies/refund-policy)."}
        }));
        let bus = Arc::new(EventBus::new());
        let widget = widget(backend, bus.clone(), PageContext::default());
        let mut rx = bus.subscribe();

        widget.text().send("refund policy?").await;

        let events = drain(&mut rx);
        let rendered = events
            .iter()
            .position(|e| matches!(e, Event::MessageAppended { message, .. } if message.role == Role::Assistant));
        let navigated = events.iter().position(|e| matches!(e, Event::Navigate { .. }));
        assert!(rendered.unwrap() < navigated.unwrap());
    }

    #[tokio::test]
    async fn pending_item_selection_gets_the_next_message() {
        let backend = Arc::new(MockBackend::default());
        backend.queue_chat(json!({"response": {
            "answer": "Let's start your return.",
            "action": "return",
            "action_context": {"order_number": "1001", "email": "ann@example.com"}
        }}));
        backend.set_details(json!({"lineItems": [{"title": "Tee"}, {"title": "Cap"}]}));
        let bus = Arc::new(EventBus::new());
        let widget = widget(
            backend.clone(),
            bus,
            PageContext {
                shopify_customer: Some(json!({"id": 1, "email": "ann@example.com"})),
                ..Default::default()
            },
        );
        widget.text().open();

        widget.text().send("I want to return something").await;
        let outcome = widget.text().send("the tee").await;

        assert_eq!(outcome, SendOutcome::HandledLocally);
        assert_eq!(backend.chat_requests().len(), 1);
        assert_eq!(backend.proxied()[0].payload["items"][0]["title"], "Tee");
        let last = widget.text().conversation().messages().pop().unwrap();
        assert!(last.content.contains("has been submitted"));
    }

    #[tokio::test]
    async fn close_then_reopen_keeps_the_transcript() {
        let backend = Arc::new(MockBackend::default());
        backend.queue_chat(json!({"response": {"answer": "Hello!"}}));
        let bus = Arc::new(EventBus::new());
        let widget = widget(backend, bus, PageContext::default());
        widget.text().open();
        widget.text().send("hi").await;
        widget.text().close();
        assert_eq!(widget.ui().state(), UiState::Closed);
        widget.text().open();
        assert_eq!(widget.text().conversation().messages().len(), 2);
    }
}
