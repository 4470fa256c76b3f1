use crate::chat::Message;
use crate::dom::DomEffect;
use crate::widget::ui::{Interface, UiState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A message was appended to one of the chat transcripts
    MessageAppended { interface: Interface, message: Message },

    /// Typing / recording / speaking indicator toggled
    Indicator {
        interface: Interface,
        indicator: Indicator,
        visible: bool,
    },

    /// The single UI state owner changed state
    InterfaceChanged(UiState),

    /// Welcome banner rendered for an empty thread
    WelcomeShown { interface: Interface, text: String },

    /// The page should navigate
    Navigate { url: String },

    /// A mutation applied to the page document
    Dom(DomEffect),

    /// Synthesized speech for the shim to play (base64 payload)
    PlayAudio {
        mime: String,
        data: String,
        playback: String,
    },

    SystemNotification {
        level: NotificationLevel,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    Typing,
    Recording,
    /// The customer is talking into the mic
    VoiceActivity,
    /// Synthesized answer playing
    Speaking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // No receivers is fine: the UI may not be attached yet
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains whatever is currently buffered on a receiver. Test helper shared
/// across modules.
#[cfg(test)]
pub(crate) fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
