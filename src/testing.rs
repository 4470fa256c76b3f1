//! In-memory collaborators shared by the unit tests.

use crate::api::{
    AudioClip, Backend, ChatReply, ChatRequest, OrderDetails, OrderLookup, OrderVerification,
    ProxyOutcome, ProxyRequest, SessionState, Storefront,
};
use crate::customer::Customer;
use crate::widget::Reporter;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct MockBackend {
    calls: Mutex<Vec<String>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
    chat_replies: Mutex<VecDeque<Result<Value, String>>>,
    chat_delay: Mutex<Option<Duration>>,
    customer: Mutex<Option<Value>>,
    verification: Mutex<Result<OrderVerification, String>>,
    details: Mutex<Result<OrderDetails, String>>,
    proxy_outcome: Mutex<Result<ProxyOutcome, String>>,
    proxied: Mutex<Vec<ProxyRequest>>,
    transcript: Mutex<Result<String, String>>,
    speech: Mutex<Result<AudioClip, String>>,
    session: Mutex<Result<SessionState, String>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            chat_requests: Mutex::new(Vec::new()),
            chat_replies: Mutex::new(VecDeque::new()),
            chat_delay: Mutex::new(None),
            customer: Mutex::new(None),
            verification: Mutex::new(Ok(OrderVerification {
                verified: true,
                message: None,
            })),
            details: Mutex::new(Ok(OrderDetails::default())),
            proxy_outcome: Mutex::new(Ok(ProxyOutcome {
                success: true,
                message: None,
            })),
            proxied: Mutex::new(Vec::new()),
            transcript: Mutex::new(Ok("hello".to_string())),
            speech: Mutex::new(Ok(AudioClip::new(vec![1, 2, 3], "audio/mpeg"))),
            session: Mutex::new(Ok(SessionState::default())),
        }
    }
}

impl MockBackend {
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        lock(&self.chat_requests).clone()
    }

    pub fn proxied(&self) -> Vec<ProxyRequest> {
        lock(&self.proxied).clone()
    }

    /// Queue a raw chat endpoint body.
    pub fn queue_chat(&self, body: Value) {
        lock(&self.chat_replies).push_back(Ok(body));
    }

    pub fn queue_chat_failure(&self, message: &str) {
        lock(&self.chat_replies).push_back(Err(message.to_string()));
    }

    pub fn set_chat_delay(&self, delay: Duration) {
        *lock(&self.chat_delay) = Some(delay);
    }

    pub fn set_customer(&self, customer: Value) {
        *lock(&self.customer) = Some(customer);
    }

    pub fn set_verification(&self, verification: Result<OrderVerification, String>) {
        *lock(&self.verification) = verification;
    }

    pub fn set_details(&self, details: Value) {
        *lock(&self.details) = serde_json::from_value(details).map_err(|e| e.to_string());
    }

    pub fn set_proxy_outcome(&self, outcome: Result<ProxyOutcome, String>) {
        *lock(&self.proxy_outcome) = outcome;
    }

    pub fn set_transcript(&self, transcript: Result<String, String>) {
        *lock(&self.transcript) = transcript;
    }

    pub fn set_session(&self, session: SessionState) {
        *lock(&self.session) = Ok(session);
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        self.record("chat".into());
        lock(&self.chat_requests).push(request.clone());
        let delay = *lock(&self.chat_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = lock(&self.chat_replies).pop_front();
        match next {
            Some(Ok(body)) => crate::api::parse_chat_reply(body),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no chat reply queued")),
        }
    }

    async fn transcribe(&self, audio: &AudioClip) -> Result<String> {
        self.record(format!("transcribe:{}", audio.mime));
        lock(&self.transcript).clone().map_err(|e| anyhow!(e))
    }

    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        self.record(format!("synthesize:{}", text));
        lock(&self.speech).clone().map_err(|e| anyhow!(e))
    }

    async fn load_session(&self, _website_id: Option<&str>) -> Result<SessionState> {
        self.record("load_session".into());
        lock(&self.session).clone().map_err(|e| anyhow!(e))
    }

    async fn clear_session(&self, thread_id: Option<&str>) -> Result<()> {
        self.record(format!("clear_session:{}", thread_id.unwrap_or("-")));
        Ok(())
    }

    async fn fetch_customer(
        &self,
        token: &str,
        customer_id: Option<&str>,
    ) -> Result<Option<Customer>> {
        self.record(format!("fetch_customer:{}:{}", token, customer_id.unwrap_or("-")));
        Ok(lock(&self.customer).as_ref().and_then(Customer::from_value))
    }

    async fn verify_order(&self, lookup: &OrderLookup) -> Result<OrderVerification> {
        self.record(format!("verify_order:{}", lookup.display_id()));
        lock(&self.verification).clone().map_err(|e| anyhow!(e))
    }

    async fn order_details(&self, lookup: &OrderLookup) -> Result<OrderDetails> {
        self.record(format!("order_details:{}", lookup.display_id()));
        lock(&self.details).clone().map_err(|e| anyhow!(e))
    }

    async fn proxy(&self, request: &ProxyRequest) -> Result<ProxyOutcome> {
        self.record(format!("proxy:{}", request.action));
        lock(&self.proxied).push(request.clone());
        lock(&self.proxy_outcome).clone().map_err(|e| anyhow!(e))
    }
}

#[derive(Default)]
pub struct MockStorefront {
    calls: Mutex<Vec<String>>,
    fail_cart: Mutex<bool>,
    reject_login: Mutex<bool>,
    panic_on_variant: Mutex<Option<String>>,
}

impl MockStorefront {
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn cart_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.as_str() == "cart").count()
    }

    pub fn fail_cart(&self) {
        *lock(&self.fail_cart) = true;
    }

    pub fn reject_login(&self) {
        *lock(&self.reject_login) = true;
    }

    pub fn panic_on_variant(&self, variant_id: &str) {
        *lock(&self.panic_on_variant) = Some(variant_id.to_string());
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl Storefront for MockStorefront {
    async fn add_to_cart(&self, variant_id: &str, quantity: u32) -> Result<Value> {
        self.record(format!("add_to_cart:{}:{}", variant_id, quantity));
        let explode = lock(&self.panic_on_variant).as_deref() == Some(variant_id);
        if explode {
            panic!("cart endpoint blew up for variant {}", variant_id);
        }
        Ok(json!({"items": [{"id": variant_id, "quantity": quantity}]}))
    }

    async fn cart(&self) -> Result<Value> {
        self.record("cart".into());
        if *lock(&self.fail_cart) {
            return Err(anyhow!("cart.js returned 500"));
        }
        Ok(json!({"item_count": 0, "items": []}))
    }

    async fn login(&self, email: &str, _password: &str) -> Result<bool> {
        self.record(format!("login:{}", email));
        Ok(!*lock(&self.reject_login))
    }

    async fn recover(&self, email: &str) -> Result<()> {
        self.record(format!("recover:{}", email));
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.record("logout".into());
        Ok(())
    }

    async fn newsletter_signup(&self, email: &str) -> Result<()> {
        self.record(format!("newsletter:{}", email));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }

    pub fn last(&self) -> Option<String> {
        self.messages().last().cloned()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, text: &str) {
        lock(&self.messages).push(text.to_string());
    }
}
