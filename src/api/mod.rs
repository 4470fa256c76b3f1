//! Network collaborators: the Voicero backend and the Shopify storefront.
//! Both sit behind traits so the widget core can be driven without a network.

pub mod client;
pub mod orders;
pub mod storefront;

pub use client::VoiceroClient;
pub use orders::{LineItem, OrderDetails, OrderLookup, OrderVerification, ProxyOutcome, ProxyRequest};
pub use storefront::{Storefront, StorefrontClient};

use crate::chat::{Role, Thread};
use crate::customer::Customer;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Voice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PastContext {
    pub messages: Vec<ContextMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_id: Option<String>,
    pub current_page_url: String,
    pub past_context: PastContext,
}

/// What the assistant answered and, optionally, what to do on the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(default)]
    pub action: Option<String>,
    /// A single target object or an array of them.
    #[serde(default)]
    pub action_context: Option<Value>,
    #[serde(default)]
    pub url: Option<String>,
}

impl ChatResponse {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            answer: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub thread_id: Option<String>,
    pub response: ChatResponse,
}

/// Parses the chat endpoint's body.
///
/// The canonical shape is `{threadId?, response: {answer, action?, action_context?, url?}}`.
/// A bare string `response` is still accepted (answer only) but logged as
/// deprecated; any other shape is treated as a backend failure.
pub fn parse_chat_reply(body: Value) -> Result<ChatReply> {
    let thread_id = body
        .get("threadId")
        .and_then(Value::as_str)
        .map(str::to_string);

    let response = match body.get("response") {
        Some(Value::Object(_)) => {
            let raw = body.get("response").cloned().unwrap_or(Value::Null);
            serde_json::from_value::<ChatResponse>(raw).context("malformed chat response object")?
        }
        Some(Value::String(answer)) => {
            warn!("backend returned deprecated string response shape");
            ChatResponse::answer(answer.clone())
        }
        _ => bail!("chat reply has no 'response' object"),
    };

    Ok(ChatReply {
        thread_id,
        response,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }
}

/// Server-side session state the widget resumes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub threads: Vec<Thread>,
    #[serde(default)]
    pub text_welcome: bool,
    #[serde(default)]
    pub voice_welcome: bool,
    #[serde(default)]
    pub text_open: bool,
    #[serde(default)]
    pub voice_open: bool,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply>;
    async fn transcribe(&self, audio: &AudioClip) -> Result<String>;
    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
    async fn load_session(&self, website_id: Option<&str>) -> Result<SessionState>;
    async fn clear_session(&self, thread_id: Option<&str>) -> Result<()>;
    /// Authenticated customer lookup. `customer_id` narrows the lookup when
    /// the page injected one.
    async fn fetch_customer(&self, token: &str, customer_id: Option<&str>)
        -> Result<Option<Customer>>;
    async fn verify_order(&self, lookup: &OrderLookup) -> Result<OrderVerification>;
    async fn order_details(&self, lookup: &OrderLookup) -> Result<OrderDetails>;
    /// The generic action proxy.
    async fn proxy(&self, request: &ProxyRequest) -> Result<ProxyOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_canonical_reply() {
        let reply = parse_chat_reply(json!({
            "threadId": "t1",
            "response": {"answer": "Hi", "action": "redirect", "url": "/cart"}
        }))
        .unwrap();
        assert_eq!(reply.thread_id.as_deref(), Some("t1"));
        assert_eq!(reply.response.answer, "Hi");
        assert_eq!(reply.response.action.as_deref(), Some("redirect"));
        assert_eq!(reply.response.url.as_deref(), Some("/cart"));
    }

    #[test]
    fn accepts_deprecated_string_response() {
        let reply = parse_chat_reply(json!({"response": "plain"})).unwrap();
        assert_eq!(reply.response, ChatResponse::answer("plain"));
        assert!(reply.thread_id.is_none());
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(parse_chat_reply(json!({"answer": "top-level"})).is_err());
        assert!(parse_chat_reply(json!({"response": {"action": "click"}})).is_err());
    }

    #[test]
    fn request_serializes_backend_field_names() {
        let request = ChatRequest {
            message: "hello".into(),
            kind: MessageKind::Voice,
            thread_id: None,
            website_id: Some("w1".into()),
            current_page_url: "https://shop.example/".into(),
            past_context: PastContext::default(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "voice");
        assert_eq!(value["websiteId"], "w1");
        assert_eq!(value["currentPageUrl"], "https://shop.example/");
        assert!(value.get("threadId").is_none());
        assert_eq!(value["pastContext"]["messages"], json!([]));
    }
}
