//! One chat transcript and its exchanges with the backend.

use super::ui::Interface;
use crate::api::{Backend, ChatRequest, ChatResponse, ContextMessage, MessageKind, PastContext};
use crate::bus::{Event, EventBus, Indicator};
use crate::chat::{Message, Role, Thread};
use crate::dom::Document;
use regex::Regex;
use std::sync::{Arc, LazyLock, Mutex};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

static MARKDOWN_LINK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)\)").ok());
static BARE_LINK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).ok());

pub const CHAT_ERROR: &str =
    "Sorry, I couldn't get a response just now. Please try sending your message again.";

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Answered(ChatResponse),
    /// Empty input, or another send is still outstanding.
    Rejected,
    /// Answered without the backend (pending return selection).
    HandledLocally,
    Failed,
    /// The interface closed before the reply arrived.
    Discarded,
}

#[derive(Debug, Default)]
struct Transcript {
    thread_id: Option<String>,
    messages: Vec<Message>,
}

/// A user message that holds the conversation's send lock until it is
/// answered or dropped.
pub struct Turn {
    text: String,
    token: CancellationToken,
    _lock: OwnedMutexGuard<()>,
}

impl Turn {
    pub fn text(&self) -> &str {
        &self.text
    }
}

pub struct Conversation {
    interface: Interface,
    backend: Arc<dyn Backend>,
    doc: Arc<dyn Document>,
    bus: Arc<EventBus>,
    website_id: Option<String>,
    origin: Url,
    transcript: Mutex<Transcript>,
    in_flight: Arc<tokio::sync::Mutex<()>>,
    cancel: Mutex<CancellationToken>,
}

impl Conversation {
    pub fn new(
        interface: Interface,
        backend: Arc<dyn Backend>,
        doc: Arc<dyn Document>,
        bus: Arc<EventBus>,
        website_id: Option<String>,
        origin: Url,
    ) -> Self {
        Self {
            interface,
            backend,
            doc,
            bus,
            website_id,
            origin,
            transcript: Mutex::new(Transcript::default()),
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn interface(&self) -> Interface {
        self.interface
    }

    pub fn thread_id(&self) -> Option<String> {
        self.lock().thread_id.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn has_messages(&self) -> bool {
        !self.lock().messages.is_empty()
    }

    pub fn is_waiting(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Transcript> {
        self.transcript.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn append(&self, message: Message) {
        self.lock().messages.push(message.clone());
        self.bus.publish(Event::MessageAppended {
            interface: self.interface,
            message,
        });
    }

    pub fn append_assistant(&self, text: &str) {
        let thread_id = self.thread_id();
        self.append(Message::assistant(text, thread_id));
    }

    pub fn indicator(&self, indicator: Indicator, visible: bool) {
        self.bus.publish(Event::Indicator {
            interface: self.interface,
            indicator,
            visible,
        });
    }

    /// Replaces the transcript with a stored thread.
    pub fn resume(&self, thread: &Thread) {
        let messages = thread.ordered_messages();
        {
            let mut transcript = self.lock();
            transcript.thread_id = Some(thread.thread_id.clone());
            transcript.messages = messages.clone();
        }
        info!(
            "{} chat resumed thread {} ({} messages)",
            self.interface.as_str(),
            thread.thread_id,
            messages.len()
        );
        for message in messages {
            self.bus.publish(Event::MessageAppended {
                interface: self.interface,
                message,
            });
        }
    }

    /// Starts a new thread, dropping the local transcript.
    pub async fn clear(&self) {
        let thread_id = {
            let mut transcript = self.lock();
            transcript.messages.clear();
            transcript.thread_id.take()
        };
        if let Err(e) = self.backend.clear_session(thread_id.as_deref()).await {
            warn!("session clear failed: {:#}", e);
        }
    }

    /// Any reply still in flight will be discarded on arrival.
    pub fn cancel_pending(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Appends the user's message and takes the send lock. `None` for blank
    /// input or while a previous message is still being answered.
    pub fn begin(&self, text: &str) -> Option<Turn> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let Ok(lock) = self.in_flight.clone().try_lock_owned() else {
            info!("{} send ignored: a reply is still pending", self.interface.as_str());
            return None;
        };
        let token = self.cancel.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let thread_id = self.thread_id();
        self.append(Message::user(text, thread_id));
        Some(Turn {
            text: text.to_string(),
            token,
            _lock: lock,
        })
    }

    /// Sends the turn to the backend and records the answer.
    pub async fn exchange(&self, turn: Turn, kind: MessageKind) -> SendOutcome {
        let request = ChatRequest {
            message: turn.text.clone(),
            kind,
            thread_id: self.thread_id(),
            website_id: self.website_id.clone(),
            current_page_url: self.doc.url().unwrap_or_else(|| self.origin.to_string()),
            past_context: self.past_context(),
        };

        self.indicator(Indicator::Typing, true);
        let result = tokio::select! {
            _ = turn.token.cancelled() => None,
            reply = self.backend.chat(&request) => Some(reply),
        };
        self.indicator(Indicator::Typing, false);

        match result {
            None => {
                info!("{} chat closed; reply discarded", self.interface.as_str());
                SendOutcome::Discarded
            }
            Some(Ok(reply)) => {
                if let Some(thread_id) = reply.thread_id.filter(|t| !t.is_empty()) {
                    self.lock().thread_id = Some(thread_id);
                }
                if !reply.response.answer.trim().is_empty() {
                    self.append_assistant(&reply.response.answer);
                }
                SendOutcome::Answered(reply.response)
            }
            Some(Err(e)) => {
                error!("chat request failed: {:#}", e);
                self.append_assistant(CHAT_ERROR);
                SendOutcome::Failed
            }
        }
    }

    /// The last complete user/assistant exchange before the message being
    /// sent.
    fn past_context(&self) -> PastContext {
        let transcript = self.lock();
        let earlier = transcript
            .messages
            .split_last()
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        let Some(answer_at) = earlier.iter().rposition(|m| m.role == Role::Assistant) else {
            return PastContext::default();
        };
        let question = earlier[..answer_at]
            .iter()
            .rev()
            .find(|m| m.role == Role::User);

        let messages = question
            .into_iter()
            .chain(std::iter::once(&earlier[answer_at]))
            .map(|m| ContextMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();
        PastContext { messages }
    }
}

/// First storefront link in an answer: markdown `[text](url)`, a bare
/// absolute URL on the store's host, or a root-relative path in a link.
pub fn embedded_url(answer: &str, origin: &Url) -> Option<Url> {
    let markdown = MARKDOWN_LINK.as_ref()?;
    let bare = BARE_LINK.as_ref()?;

    let candidates = markdown
        .captures_iter(answer)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .chain(bare.find_iter(answer).map(|m| m.as_str().to_string()));

    for candidate in candidates {
        let candidate = candidate.trim_end_matches(['.', ',', '!', '?', ';', ':']);
        let Ok(url) = origin.join(candidate) else {
            continue;
        };
        if matches!(url.scheme(), "http" | "https") && url.host_str() == origin.host_str() {
            return Some(url);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::drain;
    use crate::dom::Page;
    use crate::testing::MockBackend;
    use serde_json::json;
    use std::time::Duration;

    fn conversation(backend: Arc<MockBackend>) -> (Arc<Conversation>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let page = Page::from_json(json!({"url": "https://shop.example/products/tee", "body": []})).unwrap();
        let conversation = Conversation::new(
            Interface::Text,
            backend,
            Arc::new(page),
            bus.clone(),
            Some("site-1".into()),
            Url::parse("https://shop.example").unwrap(),
        );
        (Arc::new(conversation), bus)
    }

    #[tokio::test]
    async fn request_carries_the_last_exchange_only() {
        let backend = Arc::new(MockBackend::default());
        backend.queue_chat(json!({"threadId": "t1", "response": {"answer": "First answer"}}));
        backend.queue_chat(json!({"threadId": "t1", "response": {"answer": "Second answer"}}));
        backend.queue_chat(json!({"threadId": "t1", "response": {"answer": "Third answer"}}));
        let (conv, _bus) = conversation(backend.clone());

        for text in ["one", "two", "three"] {
            let turn = conv.begin(text).unwrap();
            conv.exchange(turn, MessageKind::Text).await;
        }

        let requests = backend.chat_requests();
        assert!(requests[0].past_context.messages.is_empty());
        assert!(requests[0].thread_id.is_none());
        let last = &requests[2];
        assert_eq!(last.thread_id.as_deref(), Some("t1"));
        assert_eq!(last.website_id.as_deref(), Some("site-1"));
        assert_eq!(last.current_page_url, "https://shop.example/products/tee");
        let context: Vec<_> = last.past_context.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(context, vec!["two", "Second answer"]);
    }

    #[tokio::test]
    async fn duplicate_sends_are_rejected_while_waiting() {
        let backend = Arc::new(MockBackend::default());
        let (conv, _bus) = conversation(backend);
        let first = conv.begin("hello").unwrap();
        assert!(conv.is_waiting());
        assert!(conv.begin("hello again").is_none());
        drop(first);
        assert!(conv.begin("   ").is_none());
        assert!(conv.begin("hello again").is_some());
    }

    #[tokio::test]
    async fn failures_append_the_error_template() {
        let backend = Arc::new(MockBackend::default());
        backend.queue_chat_failure("503");
        let (conv, bus) = conversation(backend);
        let mut rx = bus.subscribe();

        let turn = conv.begin("hello").unwrap();
        assert_eq!(conv.exchange(turn, MessageKind::Text).await, SendOutcome::Failed);

        let messages = conv.messages();
        assert_eq!(messages.last().unwrap().content, CHAT_ERROR);
        let indicators: Vec<bool> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Event::Indicator { visible, .. } => Some(visible),
                _ => None,
            })
            .collect();
        assert_eq!(indicators, vec![true, false]);
    }

    #[tokio::test]
    async fn closing_discards_the_late_reply() {
        let backend = Arc::new(MockBackend::default());
        backend.set_chat_delay(Duration::from_millis(200));
        backend.queue_chat(json!({"threadId": "t9", "response": {"answer": "late"}}));
        let (conv, _bus) = conversation(backend);

        let turn = conv.begin("hello").unwrap();
        let pending = {
            let conv = conv.clone();
            tokio::spawn(async move { conv.exchange(turn, MessageKind::Text).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        conv.cancel_pending();

        assert_eq!(pending.await.unwrap(), SendOutcome::Discarded);
        assert_eq!(conv.messages().len(), 1);
        assert!(conv.thread_id().is_none());
        assert!(!conv.is_waiting());
    }

    #[test]
    fn embedded_links_must_stay_on_the_store() {
        let origin = Url::parse("https://shop.example").unwrap();
        assert_eq!(
            embedded_url("See [our returns page](/pages/returns).", &origin).unwrap().as_str(),
            "https://shop.example/pages/returns"
        );
        assert_eq!(
            embedded_url("Open https://shop.example/cart.", &origin).unwrap().as_str(),
            "https://shop.example/cart"
        );
        assert!(embedded_url("Track it at https://carrier.example/track/1", &origin).is_none());
        assert!(embedded_url("[click](javascript:alert(1))", &origin).is_none());
        assert!(embedded_url("No links here", &origin).is_none());
    }
}
