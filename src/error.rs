//! Failure taxonomy shared by the action handlers, the return flow and the widgets.
//!
//! None of these errors ever reach the caller of `ActionHandler::handle` or the
//! widget send paths; they are converted at the boundary into either a chat
//! message (via [`WidgetError::user_message`]) or a log line.

use thiserror::Error;

pub const NETWORK_APOLOGY: &str =
    "Sorry, I ran into a problem reaching the store just now. Please try again in a moment.";

#[derive(Debug, Error)]
pub enum WidgetError {
    /// A required field is absent. No network call was attempted.
    #[error("missing required input: {field}")]
    MissingInput { field: &'static str, prompt: String },

    /// Not logged in, or the order does not belong to the customer.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Non-2xx response or transport error.
    #[error("network failure: {0:#}")]
    Network(#[from] anyhow::Error),

    /// DOM target missing. Log-only.
    #[error("element not found: {0}")]
    NotFound(String),

    /// Microphone denied, unsupported browser, no device.
    #[error("media unavailable: {0}")]
    Media(#[from] MediaFailure),

    /// Action context that failed validation. Log-only.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaFailure {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("audio recording is not supported")]
    Unsupported,
    #[error("no microphone found")]
    NoDevice,
    #[error("{0}")]
    Other(String),
}

impl WidgetError {
    pub fn missing(field: &'static str, prompt: impl Into<String>) -> Self {
        Self::MissingInput {
            field,
            prompt: prompt.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Text rendered into the chat for this failure, or `None` when the
    /// failure is only logged.
    pub fn user_message(&self) -> Option<String> {
        match self {
            WidgetError::MissingInput { prompt, .. } => Some(prompt.clone()),
            WidgetError::Unauthorized(message) => Some(message.clone()),
            WidgetError::Network(_) => Some(NETWORK_APOLOGY.to_string()),
            WidgetError::Media(failure) => Some(failure.instructions().to_string()),
            WidgetError::NotFound(_) | WidgetError::InvalidTarget(_) => None,
        }
    }
}

impl MediaFailure {
    pub fn instructions(&self) -> &str {
        match self {
            MediaFailure::PermissionDenied => {
                "I need microphone access to hear you. Please allow microphone access in your browser settings and tap the mic again."
            }
            MediaFailure::Unsupported => {
                "Voice input isn't supported in this browser. Please try a recent version of Chrome, Safari or Firefox, or use text chat instead."
            }
            MediaFailure::NoDevice => {
                "I couldn't find a microphone. Please connect one and try again, or use text chat instead."
            }
            MediaFailure::Other(_) => {
                "Something went wrong with the microphone. Please try again or switch to text chat."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_only_failures_render_nothing() {
        assert!(WidgetError::not_found("button 'Buy'").user_message().is_none());
        assert!(WidgetError::InvalidTarget("bad".into()).user_message().is_none());
    }

    #[test]
    fn network_failures_render_the_apology() {
        let err = WidgetError::from(anyhow::anyhow!("502 Bad Gateway"));
        assert_eq!(err.user_message().as_deref(), Some(NETWORK_APOLOGY));
    }

    #[test]
    fn missing_input_renders_its_prompt() {
        let err = WidgetError::missing("email", "What email did you use?");
        assert_eq!(err.user_message().as_deref(), Some("What email did you use?"));
    }
}
