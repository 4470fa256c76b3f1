use super::{
    parse_chat_reply, AudioClip, Backend, ChatReply, ChatRequest, OrderDetails, OrderLookup,
    OrderVerification, ProxyOutcome, ProxyRequest, SessionState,
};
use crate::config::Config;
use crate::customer::Customer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// HTTP client for the Voicero backend.
#[derive(Clone)]
pub struct VoiceroClient {
    http: reqwest::Client,
    base_url: String,
    access_key: Option<String>,
}

impl VoiceroClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build backend HTTP client")?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            access_key: config.access_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.request(method, url);
        match &self.access_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("{} request failed", what))?;
        let status = response.status();
        debug!("<- {} {}", what, status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {}: {}", what, status, body);
        }
        Ok(response)
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        debug!("-> POST {}", path);
        let response = self
            .send(self.request(Method::POST, path).json(body), path)
            .await?;
        response
            .json::<R>()
            .await
            .with_context(|| format!("{} returned malformed JSON", path))
    }
}

#[async_trait]
impl Backend for VoiceroClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply> {
        let body: Value = self.post_json("/api/shopify/chat", request).await?;
        parse_chat_reply(body)
    }

    async fn transcribe(&self, audio: &AudioClip) -> Result<String> {
        let extension = audio.mime.split('/').nth(1).unwrap_or("webm");
        let part = multipart::Part::bytes(audio.bytes.clone())
            .file_name(format!("recording.{}", extension))
            .mime_str(&audio.mime)
            .context("invalid audio mime type")?;
        let form = multipart::Form::new().part("audio", part);

        let response = self
            .send(
                self.request(Method::POST, "/api/whisper").multipart(form),
                "/api/whisper",
            )
            .await?;
        let body: Value = response
            .json()
            .await
            .context("/api/whisper returned malformed JSON")?;
        body.get("text")
            .and_then(Value::as_str)
            .map(|t| t.trim().to_string())
            .context("transcription response has no text")
    }

    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let response = self
            .send(
                self.request(Method::POST, "/api/tts").json(&json!({ "text": text })),
                "/api/tts",
            )
            .await?;
        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let bytes = response.bytes().await.context("failed to read TTS audio")?;
        Ok(AudioClip::new(bytes.to_vec(), mime))
    }

    async fn load_session(&self, website_id: Option<&str>) -> Result<SessionState> {
        let mut builder = self.request(Method::GET, "/api/session");
        if let Some(id) = website_id {
            builder = builder.query(&[("websiteId", id)]);
        }
        let response = self.send(builder, "/api/session").await?;
        let body: Value = response
            .json()
            .await
            .context("/api/session returned malformed JSON")?;
        // Either the state itself or wrapped in {session: ...}
        let state = body.get("session").cloned().unwrap_or(body);
        serde_json::from_value(state).context("malformed session state")
    }

    async fn clear_session(&self, thread_id: Option<&str>) -> Result<()> {
        let _: Value = self
            .post_json("/api/session/clear", &json!({ "threadId": thread_id }))
            .await?;
        Ok(())
    }

    async fn fetch_customer(
        &self,
        token: &str,
        customer_id: Option<&str>,
    ) -> Result<Option<Customer>> {
        let body: Value = self
            .post_json(
                "/api/shopify/customer",
                &json!({ "sessionToken": token, "customerId": customer_id }),
            )
            .await?;
        match body.get("customer") {
            Some(Value::Null) | None => Ok(None),
            Some(customer) => Ok(Customer::from_value(customer)),
        }
    }

    async fn verify_order(&self, lookup: &OrderLookup) -> Result<OrderVerification> {
        self.post_json("/api/shopify/orders/verify", lookup).await
    }

    async fn order_details(&self, lookup: &OrderLookup) -> Result<OrderDetails> {
        let body: Value = self.post_json("/api/shopify/orders/details", lookup).await?;
        let order = body.get("order").cloned().unwrap_or(body);
        serde_json::from_value(order).context("malformed order details")
    }

    async fn proxy(&self, request: &ProxyRequest) -> Result<ProxyOutcome> {
        self.post_json("/api/shopify/proxy", request).await
    }
}
