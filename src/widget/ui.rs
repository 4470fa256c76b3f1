//! The single owner of what the customer sees: which chat interface is
//! open and whether it is maximized. Every transition is published.

use crate::bus::{Event, EventBus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    Text,
    Voice,
}

impl Interface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interface::Text => "text",
            Interface::Voice => "voice",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Maximized,
    Minimized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum UiState {
    Closed,
    Open { interface: Interface, view: View },
}

impl UiState {
    pub fn interface(&self) -> Option<Interface> {
        match self {
            UiState::Closed => None,
            UiState::Open { interface, .. } => Some(*interface),
        }
    }

    pub fn is_open(&self, which: Interface) -> bool {
        self.interface() == Some(which)
    }
}

/// Backend session flags: show a welcome banner on first open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    pub text_welcome: bool,
    pub voice_welcome: bool,
}

impl SessionFlags {
    fn welcome(&self, interface: Interface) -> bool {
        match interface {
            Interface::Text => self.text_welcome,
            Interface::Voice => self.voice_welcome,
        }
    }
}

pub struct UiController {
    state: Mutex<UiState>,
    flags: Mutex<SessionFlags>,
    welcomed: Mutex<HashSet<Interface>>,
    welcome_message: String,
    bus: Arc<EventBus>,
}

impl UiController {
    pub fn new(bus: Arc<EventBus>, welcome_message: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(UiState::Closed),
            flags: Mutex::new(SessionFlags::default()),
            welcomed: Mutex::new(HashSet::new()),
            welcome_message: welcome_message.into(),
            bus,
        }
    }

    pub fn state(&self) -> UiState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_flags(&self, flags: SessionFlags) {
        *self.flags.lock().unwrap_or_else(|e| e.into_inner()) = flags;
    }

    /// Opens `interface` maximized, closing the other one in the same
    /// transition. An empty transcript gets the welcome banner once per
    /// interface when the session asks for it.
    pub fn open(&self, interface: Interface, has_messages: bool) -> UiState {
        let next = UiState::Open {
            interface,
            view: View::Maximized,
        };
        let previous = self.transition(next);
        if previous.is_open(interface) {
            return next;
        }

        let wants_welcome = self
            .flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .welcome(interface);
        if wants_welcome && !has_messages {
            let first_time = self
                .welcomed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(interface);
            if first_time {
                self.bus.publish(Event::WelcomeShown {
                    interface,
                    text: self.welcome_message.clone(),
                });
            }
        }
        next
    }

    /// Hides the transcript but keeps the interface open.
    pub fn minimize(&self, interface: Interface) -> UiState {
        self.set_view(interface, View::Minimized)
    }

    pub fn maximize(&self, interface: Interface) -> UiState {
        self.set_view(interface, View::Maximized)
    }

    /// Closes `interface` if it is the one showing. Returns whether it was.
    pub fn close(&self, interface: Interface) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.is_open(interface) {
            return false;
        }
        *state = UiState::Closed;
        drop(state);
        self.bus.publish(Event::InterfaceChanged(UiState::Closed));
        true
    }

    fn set_view(&self, interface: Interface, view: View) -> UiState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let current = *state;
        match current {
            UiState::Open {
                interface: open,
                view: shown,
            } if open == interface && shown != view => {
                let next = UiState::Open { interface, view };
                *state = next;
                drop(state);
                self.bus.publish(Event::InterfaceChanged(next));
                next
            }
            other => other,
        }
    }

    /// Replaces the state and returns the previous one.
    fn transition(&self, next: UiState) -> UiState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let previous = std::mem::replace(&mut *state, next);
        drop(state);
        if previous != next {
            debug!("ui {:?} -> {:?}", previous, next);
            self.bus.publish(Event::InterfaceChanged(next));
        }
        previous
    }
}
