//! Executes the actions the assistant attaches to its answers.
//!
//! `handle` never fails: every element of the action context runs in its
//! own guard and a failure becomes either a chat message or a log line.

mod commerce;
mod forms;
mod interact;
pub mod navigate;
pub mod target;

pub use navigate::Navigator;
pub use target::{Action, ActionKind};

use crate::api::{Backend, ChatResponse, Storefront};
use crate::customer::CustomerDataLoader;
use crate::dom::Document;
use crate::error::WidgetError;
use crate::returns::ReturnOrchestrator;
use crate::storage::ClientStorage;
use crate::widget::Reporter;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything the handlers act on.
pub struct ActionParts {
    pub doc: Arc<dyn Document>,
    pub backend: Arc<dyn Backend>,
    pub storefront: Arc<dyn Storefront>,
    pub storage: Arc<dyn ClientStorage>,
    pub customer: Arc<CustomerDataLoader>,
    pub returns: Arc<ReturnOrchestrator>,
    pub reporter: Arc<dyn Reporter>,
    pub navigator: Arc<Navigator>,
    pub auto_submit_delay: Duration,
}

pub struct ActionHandler {
    doc: Arc<dyn Document>,
    backend: Arc<dyn Backend>,
    storefront: Arc<dyn Storefront>,
    storage: Arc<dyn ClientStorage>,
    customer: Arc<CustomerDataLoader>,
    returns: Arc<ReturnOrchestrator>,
    reporter: Arc<dyn Reporter>,
    navigator: Arc<Navigator>,
    auto_submit_delay: Duration,
}

impl ActionHandler {
    pub fn new(parts: ActionParts) -> Self {
        let ActionParts {
            doc,
            backend,
            storefront,
            storage,
            customer,
            returns,
            reporter,
            navigator,
            auto_submit_delay,
        } = parts;
        Self {
            doc,
            backend,
            storefront,
            storage,
            customer,
            returns,
            reporter,
            navigator,
            auto_submit_delay,
        }
    }

    pub fn navigator(&self) -> &Arc<Navigator> {
        &self.navigator
    }

    /// Runs the response's action once per context element (once with an
    /// empty target when the context is absent). Returns how many
    /// invocations succeeded.
    pub async fn handle(&self, response: &ChatResponse) -> usize {
        let Some(name) = response
            .action
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && *n != "none")
        else {
            return 0;
        };
        let Some(kind) = ActionKind::resolve(name) else {
            info!("no handler for action '{}'", name);
            return 0;
        };

        let contexts: Vec<Option<Value>> = match &response.action_context {
            None | Some(Value::Null) => vec![None],
            Some(Value::Array(items)) => items.iter().cloned().map(Some).collect(),
            Some(single) => vec![Some(single.clone())],
        };
        debug!("action '{}' with {} target(s)", name, contexts.len());

        let mut succeeded = 0;
        for context in contexts {
            let action = match kind.parse(context.as_ref()) {
                Ok(action) => with_response_url(action, response),
                Err(e) => {
                    self.report_failure(name, e);
                    continue;
                }
            };
            match AssertUnwindSafe(self.dispatch(action)).catch_unwind().await {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => self.report_failure(name, e),
                Err(_) => error!("action '{}' panicked; continuing with the next target", name),
            }
        }
        succeeded
    }

    pub async fn dispatch(&self, action: Action) -> Result<(), WidgetError> {
        match action {
            Action::Click(query) => self.click(&query),
            Action::Scroll(target) => self.scroll(&target),
            Action::HighlightText(target) => self.highlight_text(&target),
            Action::FillForm(target) => self.fill_form(&target).await,
            Action::Login(target) => self.login(&target).await,
            Action::Logout => self.logout().await,
            Action::NewsletterSignup(target) => self.newsletter_signup(&target).await,
            Action::AccountReset(target) => self.account_reset(&target).await,
            Action::Scheduler(target) => self.scheduler(&target).await,
            Action::Subscription(target) => self.subscription(&target).await,
            Action::Purchase(target) => self.purchase(&target).await,
            Action::GetOrders => self.get_orders().await,
            Action::TrackOrder(target) => {
                self.returns.track(target.into()).await;
                Ok(())
            }
            Action::Order(kind, target) => {
                self.returns.run(kind, target.into()).await;
                Ok(())
            }
            Action::Redirect(target) => {
                let url = target
                    .url
                    .ok_or_else(|| WidgetError::InvalidTarget("redirect without url".into()))?;
                self.navigator.navigate(&url).map(|_| ())
            }
        }
    }

    fn report_failure(&self, action: &str, err: WidgetError) {
        match err.user_message() {
            Some(message) => {
                warn!("action '{}' failed: {}", action, err);
                self.reporter.report(&message);
            }
            None => info!("action '{}' skipped: {}", action, err),
        }
    }
}

/// A redirect whose context omits the url falls back to the response's
/// top-level `url`.
fn with_response_url(action: Action, response: &ChatResponse) -> Action {
    match action {
        Action::Redirect(mut target) if target.url.is_none() => {
            target.url = response.url.clone();
            Action::Redirect(target)
        }
        other => other,
    }
}
