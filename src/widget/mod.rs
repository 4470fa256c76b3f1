//! The chat widgets and the wiring between every component.
//!
//! Everything is built once in [`Widget::new`] and handed to whoever needs
//! it; nothing is global.

pub mod conversation;
pub mod shim;
pub mod text;
pub mod ui;
pub mod voice;

pub use conversation::{Conversation, SendOutcome};
pub use text::TextWidget;
pub use ui::{Interface, SessionFlags, UiController, UiState, View};
pub use voice::{AudioPlayer, Playback, Recorder, VoiceWidget};

use crate::action::{ActionHandler, ActionKind, ActionParts, Navigator};
use crate::api::{Backend, ChatResponse, Storefront};
use crate::bus::EventBus;
use crate::chat::{most_recent_thread, Thread};
use crate::config::Config;
use crate::customer::{CustomerDataLoader, PageContext};
use crate::dom::Document;
use crate::returns::ReturnOrchestrator;
use crate::storage::ClientStorage;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Where handlers and flows post their user-facing results.
pub trait Reporter: Send + Sync {
    fn report(&self, text: &str);
}

/// Appends reports to whichever chat is showing, text by default.
pub struct Messenger {
    ui: Arc<UiController>,
    text: Arc<Conversation>,
    voice: Arc<Conversation>,
}

impl Messenger {
    pub fn new(ui: Arc<UiController>, text: Arc<Conversation>, voice: Arc<Conversation>) -> Self {
        Self { ui, text, voice }
    }
}

impl Reporter for Messenger {
    fn report(&self, text: &str) {
        match self.ui.state().interface() {
            Some(Interface::Voice) => self.voice.append_assistant(text),
            _ => self.text.append_assistant(text),
        }
    }
}

/// Runs the answer's action, then follows a storefront link embedded in
/// the answer unless the action already redirected.
pub(crate) async fn follow_up(actions: &ActionHandler, response: &ChatResponse) {
    let handled = actions.handle(response).await;
    if handled > 0 {
        info!("{} action target(s) handled", handled);
    }

    let redirected = response.action.as_deref().and_then(ActionKind::resolve) == Some(ActionKind::Redirect);
    if redirected {
        return;
    }
    let navigator = actions.navigator();
    if let Some(url) = conversation::embedded_url(&response.answer, navigator.origin()) {
        if let Err(e) = navigator.navigate(url.as_str()) {
            warn!("embedded link not followed: {}", e);
        }
    }
}

pub struct WidgetParts {
    pub backend: Arc<dyn Backend>,
    pub storefront: Arc<dyn Storefront>,
    pub storage: Arc<dyn ClientStorage>,
    pub doc: Arc<dyn Document>,
    pub bus: Arc<EventBus>,
    pub recorder: Arc<dyn Recorder>,
    pub player: Arc<dyn AudioPlayer>,
    pub context: PageContext,
    /// Locally cached threads, used when the backend session is unavailable.
    pub cached_threads: Vec<Thread>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetStatus {
    pub ui: UiState,
    pub text_thread_id: Option<String>,
    pub voice_thread_id: Option<String>,
    pub text_messages: usize,
    pub voice_messages: usize,
    pub waiting_for_response: bool,
    pub recording: bool,
    pub logged_in: bool,
    pub pending_return: bool,
}

pub struct Widget {
    website_id: Option<String>,
    backend: Arc<dyn Backend>,
    cached_threads: Vec<Thread>,
    ui: Arc<UiController>,
    customer: Arc<CustomerDataLoader>,
    returns: Arc<ReturnOrchestrator>,
    actions: Arc<ActionHandler>,
    text: Arc<TextWidget>,
    voice: Arc<VoiceWidget>,
}

impl Widget {
    pub fn new(config: &Config, parts: WidgetParts) -> Self {
        let WidgetParts {
            backend,
            storefront,
            storage,
            doc,
            bus,
            recorder,
            player,
            context,
            cached_threads,
        } = parts;
        let origin = config.store_url.clone();

        let ui = Arc::new(UiController::new(bus.clone(), config.welcome_message.clone()));
        let conversation = |interface| {
            Arc::new(Conversation::new(
                interface,
                backend.clone(),
                doc.clone(),
                bus.clone(),
                config.website_id.clone(),
                origin.clone(),
            ))
        };
        let text_chat = conversation(Interface::Text);
        let voice_chat = conversation(Interface::Voice);
        let reporter: Arc<dyn Reporter> =
            Arc::new(Messenger::new(ui.clone(), text_chat.clone(), voice_chat.clone()));

        let customer = Arc::new(CustomerDataLoader::new(
            backend.clone(),
            storefront.clone(),
            doc.clone(),
            context,
        ));
        let returns = Arc::new(ReturnOrchestrator::new(
            backend.clone(),
            customer.clone(),
            doc.clone(),
            reporter.clone(),
        ));
        let actions = Arc::new(ActionHandler::new(ActionParts {
            doc,
            backend: backend.clone(),
            storefront,
            storage: storage.clone(),
            customer: customer.clone(),
            returns: returns.clone(),
            reporter,
            navigator: Arc::new(Navigator::new(origin, bus)),
            auto_submit_delay: config.auto_submit_delay,
        }));

        let text = Arc::new(TextWidget::new(
            text_chat,
            ui.clone(),
            actions.clone(),
            returns.clone(),
        ));
        let voice = Arc::new(VoiceWidget::new(voice::VoiceParts {
            conversation: voice_chat,
            ui: ui.clone(),
            actions: actions.clone(),
            returns: returns.clone(),
            backend: backend.clone(),
            storage,
            recorder,
            player,
            recording_limit: config.recording_limit,
        }));

        Self {
            website_id: config.website_id.clone(),
            backend,
            cached_threads,
            ui,
            customer,
            returns,
            actions,
            text,
            voice,
        }
    }

    pub fn ui(&self) -> &Arc<UiController> {
        &self.ui
    }

    pub fn text(&self) -> &Arc<TextWidget> {
        &self.text
    }

    pub fn voice(&self) -> &Arc<VoiceWidget> {
        &self.voice
    }

    pub fn actions(&self) -> &Arc<ActionHandler> {
        &self.actions
    }

    pub fn customer(&self) -> &Arc<CustomerDataLoader> {
        &self.customer
    }

    /// First page load: customer data, interrupted actions, the most recent
    /// thread, then voice reactivation.
    pub async fn init(&self) {
        self.customer.init().await;
        self.actions.resume_pending_action().await;
        self.resume_session().await;
        self.voice.apply_reactivation().await;
    }

    /// A new page was loaded after a navigation.
    pub async fn page_changed(&self, context: PageContext) {
        self.customer.reload(context);
        self.customer.init().await;
        self.actions.resume_pending_action().await;
        self.voice.apply_reactivation().await;
    }

    async fn resume_session(&self) {
        let session = match self.backend.load_session(self.website_id.as_deref()).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("session load failed, using the local cache: {:#}", e);
                None
            }
        };

        if let Some(session) = &session {
            self.ui.set_flags(SessionFlags {
                text_welcome: session.text_welcome,
                voice_welcome: session.voice_welcome,
            });
        }

        let threads = match &session {
            Some(session) if !session.threads.is_empty() => session.threads.as_slice(),
            _ => self.cached_threads.as_slice(),
        };
        if let Some(thread) = most_recent_thread(threads) {
            self.text.conversation().resume(thread);
            self.voice.conversation().resume(thread);
        }

        match &session {
            Some(session) if session.voice_open => {
                self.voice.open();
            }
            Some(session) if session.text_open => {
                self.text.open();
            }
            _ => {}
        }
    }

    pub fn status(&self) -> WidgetStatus {
        let text = self.text.conversation();
        let voice = self.voice.conversation();
        WidgetStatus {
            ui: self.ui.state(),
            text_thread_id: text.thread_id(),
            voice_thread_id: voice.thread_id(),
            text_messages: text.messages().len(),
            voice_messages: voice.messages().len(),
            waiting_for_response: text.is_waiting() || voice.is_waiting(),
            recording: self.voice.is_recording(),
            logged_in: self.customer.is_logged_in(),
            pending_return: self.returns.has_pending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SessionState;
    use crate::chat::Message;
    use crate::config::Config;
    use crate::dom::Page;
    use crate::storage::MemoryStorage;
    use crate::testing::{MockBackend, MockStorefront};
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use voice::tests::{ScriptedPlayer, ScriptedRecorder};

    pub(crate) fn test_config() -> Config {
        Config::from_lookup(|key| match key {
            "VOICERO_STORE_URL" => Some("https://shop.example".into()),
            "VOICERO_WEBSITE_ID" => Some("site-1".into()),
            "VOICERO_AUTO_SUBMIT_DELAY_MS" => Some("0".into()),
            "VOICERO_RECORDING_LIMIT_SECS" => Some("1".into()),
            _ => None,
        })
        .unwrap()
    }

    fn thread(id: &str, minutes_ago: i64) -> Thread {
        let at = Utc::now() - ChronoDuration::minutes(minutes_ago);
        let mut message = Message::user(format!("hello from {}", id), Some(id.to_string()));
        message.created_at = at;
        Thread {
            thread_id: id.to_string(),
            messages: vec![message],
            created_at: at - ChronoDuration::minutes(1),
            last_message_at: Some(at),
        }
    }

    fn widget(backend: Arc<MockBackend>, cached_threads: Vec<Thread>) -> Widget {
        Widget::new(
            &test_config(),
            WidgetParts {
                backend,
                storefront: Arc::new(MockStorefront::default()),
                storage: Arc::new(MemoryStorage::new()),
                doc: Arc::new(Page::empty()),
                bus: Arc::new(EventBus::new()),
                recorder: Arc::new(ScriptedRecorder::default()),
                player: Arc::new(ScriptedPlayer::default()),
                context: PageContext::default(),
                cached_threads,
            },
        )
    }

    #[tokio::test]
    async fn init_resumes_the_most_recent_thread() {
        let backend = Arc::new(MockBackend::default());
        backend.set_session(SessionState {
            threads: vec![thread("A", 30), thread("B", 5)],
            text_open: true,
            ..Default::default()
        });
        let widget = widget(backend, Vec::new());

        widget.init().await;

        let status = widget.status();
        assert_eq!(status.text_thread_id.as_deref(), Some("B"));
        assert_eq!(status.text_messages, 1);
        assert!(status.ui.is_open(Interface::Text));
        assert_eq!(widget.text().conversation().messages()[0].content, "hello from B");
    }

    #[tokio::test]
    async fn local_cache_backs_up_an_empty_session() {
        let backend = Arc::new(MockBackend::default());
        let widget = widget(backend, vec![thread("old", 60), thread("cached", 1)]);
        widget.init().await;
        assert_eq!(widget.status().voice_thread_id.as_deref(), Some("cached"));
        assert_eq!(widget.status().ui, UiState::Closed);
    }

    #[tokio::test]
    async fn reports_follow_the_open_interface() {
        let widget = widget(Arc::new(MockBackend::default()), Vec::new());
        widget.voice().open();
        widget
            .actions()
            .handle(&ChatResponse {
                answer: String::new(),
                action: Some("refund".into()),
                action_context: Some(json!({"order_id": "1001"})),
                url: None,
            })
            .await;
        assert_eq!(widget.voice().conversation().messages().len(), 1);
        assert!(widget.text().conversation().messages().is_empty());
    }
}
