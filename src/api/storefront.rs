use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Well-known Shopify storefront endpoints, used when the page has no form
/// to drive.
#[async_trait]
pub trait Storefront: Send + Sync {
    async fn add_to_cart(&self, variant_id: &str, quantity: u32) -> Result<Value>;
    async fn cart(&self) -> Result<Value>;
    /// Returns whether the storefront accepted the credentials.
    async fn login(&self, email: &str, password: &str) -> Result<bool>;
    async fn recover(&self, email: &str) -> Result<()>;
    async fn logout(&self) -> Result<()>;
    async fn newsletter_signup(&self, email: &str) -> Result<()>;
}

pub struct StorefrontClient {
    http: reqwest::Client,
    origin: Url,
}

impl StorefrontClient {
    pub fn new(origin: Url, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .cookie_store(true)
            .build()
            .context("Failed to build storefront HTTP client")?;
        Ok(Self { http, origin })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .with_context(|| format!("invalid storefront path {}", path))
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<reqwest::Response> {
        debug!("-> storefront POST {}", path);
        let response = self
            .http
            .post(self.url(path)?)
            .form(form)
            .send()
            .await
            .with_context(|| format!("storefront {} failed", path))?;
        response
            .error_for_status()
            .with_context(|| format!("storefront {} rejected the request", path))
    }
}

#[async_trait]
impl Storefront for StorefrontClient {
    async fn add_to_cart(&self, variant_id: &str, quantity: u32) -> Result<Value> {
        let body = json!({ "items": [{ "id": variant_id, "quantity": quantity }] });
        let response = self
            .http
            .post(self.url("/cart/add.js")?)
            .json(&body)
            .send()
            .await
            .context("cart add failed")?
            .error_for_status()
            .context("cart add rejected")?;
        response.json().await.context("cart add returned malformed JSON")
    }

    async fn cart(&self) -> Result<Value> {
        let response = self
            .http
            .get(self.url("/cart.js")?)
            .send()
            .await
            .context("cart fetch failed")?
            .error_for_status()
            .context("cart fetch rejected")?;
        response.json().await.context("cart returned malformed JSON")
    }

    async fn login(&self, email: &str, password: &str) -> Result<bool> {
        let response = self
            .post_form(
                "/account/login",
                &[
                    ("form_type", "customer_login"),
                    ("utf8", "✓"),
                    ("customer[email]", email),
                    ("customer[password]", password),
                ],
            )
            .await?;
        // A successful login lands on /account; a failed one re-renders the login page
        let path = response.url().path().to_string();
        Ok(path.starts_with("/account") && !path.starts_with("/account/login"))
    }

    async fn recover(&self, email: &str) -> Result<()> {
        self.post_form(
            "/account/recover",
            &[("form_type", "recover_customer_password"), ("email", email)],
        )
        .await?;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.http
            .get(self.url("/account/logout")?)
            .send()
            .await
            .context("logout failed")?
            .error_for_status()
            .context("logout rejected")?;
        Ok(())
    }

    async fn newsletter_signup(&self, email: &str) -> Result<()> {
        self.post_form(
            "/contact",
            &[
                ("form_type", "customer"),
                ("contact[email]", email),
                ("contact[tags]", "newsletter"),
            ],
        )
        .await?;
        Ok(())
    }
}
