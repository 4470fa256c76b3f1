use super::target::{normalize_name, EmailTarget, FormTarget, InputField, LoginTarget, SchedulerTarget};
use super::ActionHandler;
use crate::api::ProxyRequest;
use crate::customer::page_has_logout_link;
use crate::dom::{DomEventKind, NodeId};
use crate::error::WidgetError;
use crate::storage::{StorageScope, PENDING_ACTION_KEY, USER_CREDENTIALS_KEY, USER_DATA_KEY};
use serde_json::json;
use tracing::{debug, info};

/// Declared form types and the selectors that find them on a Shopify theme.
const FORM_TYPES: &[(&str, &str)] = &[
    ("login", LOGIN_FORM),
    ("register", "form#create_customer, form[action$=\"/account\"], form[id*=\"register\"]"),
    ("contact", "form#ContactForm, form#contact_form, form[action*=\"/contact\"]"),
    ("newsletter", NEWSLETTER_FORM),
    ("recover", RECOVER_FORM),
    ("address", "form[action*=\"/account/addresses\"]"),
    ("checkout", "form[action*=\"/checkout\"], form[action$=\"/cart\"]"),
    ("search", "form[action*=\"/search\"]"),
];

const LOGIN_FORM: &str = "form#customer_login, form[action*=\"/account/login\"]";
const RECOVER_FORM: &str = "form#recover_customer_password, form[action*=\"/account/recover\"]";
const NEWSLETTER_FORM: &str =
    "form#newsletter, form.newsletter-form, form[id*=\"newsletter\"], form[class*=\"newsletter\"], form[id*=\"Newsletter\"]";
const SCHEDULER_FORM: &str =
    "form[data-scheduler], form[id*=\"booking\"], form[class*=\"booking\"], form[id*=\"appointment\"], form[class*=\"appointment\"]";
const LOGOUT_LINK: &str = "a[href*=\"/account/logout\"]";
const EMAIL_INPUT: &str =
    "input[type=email], input[name=\"customer[email]\"], input[name=\"contact[email]\"], input[name=email]";

/// `[attr="value"]`, or `None` when the value cannot be quoted safely.
fn attr_selector(attr: &str, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.contains(['"', '\\']) {
        return None;
    }
    Some(format!("[{}=\"{}\"]", attr, value))
}

fn required<'a>(value: &'a Option<String>, field: &'static str, prompt: &str) -> Result<&'a str, WidgetError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| WidgetError::missing(field, prompt))
}

impl ActionHandler {
    fn find_in(&self, scope: Option<NodeId>, selector: &str) -> Option<NodeId> {
        match scope {
            Some(root) => self.doc.query_within(root, selector).into_iter().next(),
            None => self.doc.query_first(selector),
        }
    }

    fn find_form(&self, target: &FormTarget) -> Option<NodeId> {
        if let Some(selector) = target.form_id.as_deref().and_then(|id| attr_selector("id", id)) {
            let found = self
                .doc
                .query_first(&selector)
                .and_then(|node| self.doc.closest(node, "form"));
            if found.is_some() {
                return found;
            }
        }
        if let Some(kind) = target.form_type.as_deref().map(normalize_name) {
            match FORM_TYPES.iter().find(|(name, _)| *name == kind) {
                Some((_, selector)) => {
                    if let Some(form) = self.doc.query_first(selector) {
                        return Some(form);
                    }
                }
                None => debug!("unknown form type '{}'", kind),
            }
        }
        target
            .input_fields
            .iter()
            .find_map(|field| self.locate_field(None, field))
            .and_then(|node| self.doc.closest(node, "form"))
    }

    /// By id, then name, then placeholder substring.
    fn locate_field(&self, form: Option<NodeId>, field: &InputField) -> Option<NodeId> {
        let by_attr = [("id", &field.id), ("name", &field.name)]
            .into_iter()
            .filter_map(|(attr, value)| value.as_deref().and_then(|v| attr_selector(attr, v)))
            .find_map(|selector| self.find_in(form, &selector));
        if by_attr.is_some() {
            return by_attr;
        }

        let wanted = field
            .placeholder
            .as_deref()
            .or(field.name.as_deref())
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())?;
        let candidates = match form {
            Some(root) => self.doc.query_within(root, "input, textarea"),
            None => self.doc.query_all("input, textarea"),
        };
        candidates.into_iter().find(|&node| {
            self.doc
                .attribute(node, "placeholder")
                .is_some_and(|p| p.to_lowercase().contains(&wanted))
        })
    }

    fn apply_field(&self, form: Option<NodeId>, node: NodeId, field: &InputField) {
        let kind = self
            .doc
            .attribute(node, "type")
            .unwrap_or_default()
            .to_ascii_lowercase();
        match kind.as_str() {
            "checkbox" => self.doc.set_checked(node, field.truthy()),
            "radio" => {
                let wanted = field.text_value();
                let sibling = self
                    .doc
                    .attribute(node, "name")
                    .and_then(|name| attr_selector("name", &name))
                    .and_then(|selector| {
                        let radios = match form {
                            Some(root) => self.doc.query_within(root, &selector),
                            None => self.doc.query_all(&selector),
                        };
                        radios
                            .into_iter()
                            .find(|&radio| self.doc.value(radio).as_deref() == Some(wanted.as_str()))
                    });
                match sibling {
                    Some(radio) => {
                        self.doc.set_checked(radio, true);
                        self.doc.dispatch(radio, DomEventKind::Input);
                        self.doc.dispatch(radio, DomEventKind::Change);
                        return;
                    }
                    None => self.doc.set_checked(node, field.truthy()),
                }
            }
            _ => self.doc.set_value(node, &field.text_value()),
        }
        self.doc.dispatch(node, DomEventKind::Input);
        self.doc.dispatch(node, DomEventKind::Change);
    }

    fn set_input(&self, node: NodeId, value: &str) {
        self.doc.set_value(node, value);
        self.doc.dispatch(node, DomEventKind::Input);
        self.doc.dispatch(node, DomEventKind::Change);
    }

    /// Clicks the form's submit control so theme handlers run; submits the
    /// form itself when it has none.
    pub(super) fn submit_form(&self, form: NodeId) {
        let button = self
            .doc
            .query_within(form, "button[type=submit], input[type=submit]")
            .into_iter()
            .next()
            .or_else(|| {
                self.doc.query_within(form, "button").into_iter().find(|&b| {
                    !matches!(
                        self.doc.attribute(b, "type").as_deref(),
                        Some("button") | Some("reset")
                    )
                })
            });
        match button {
            Some(button) => self.doc.dispatch(button, DomEventKind::Click),
            None => self.doc.dispatch(form, DomEventKind::Submit),
        }
        info!("submitted form {}", form);
    }

    pub(super) async fn fill_form(&self, target: &FormTarget) -> Result<(), WidgetError> {
        if target.input_fields.is_empty() && target.form_id.is_none() && target.form_type.is_none() {
            return Err(WidgetError::InvalidTarget("fill_form without fields or form".into()));
        }

        let form = self.find_form(target);
        let mut first_filled = None;
        for field in &target.input_fields {
            match self.locate_field(form, field) {
                Some(node) => {
                    self.apply_field(form, node, field);
                    first_filled.get_or_insert(node);
                }
                None => debug!("form field {:?} not found", field.name.as_deref().or(field.id.as_deref())),
            }
        }

        let form = form.or_else(|| first_filled.and_then(|node| self.doc.closest(node, "form")));
        if form.is_none() && first_filled.is_none() {
            return Err(WidgetError::not_found("form"));
        }

        if target.auto_submit != Some(false) {
            if let Some(form) = form {
                tokio::time::sleep(self.auto_submit_delay).await;
                self.submit_form(form);
            }
        }
        Ok(())
    }

    pub(super) async fn login(&self, target: &LoginTarget) -> Result<(), WidgetError> {
        let email = target.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
        let password = target.password.as_deref().filter(|p| !p.is_empty());
        let form = self.doc.query_first(LOGIN_FORM);

        match (form, email, password) {
            (Some(form), Some(email), Some(password)) => {
                if let Some(input) = self.find_in(Some(form), EMAIL_INPUT) {
                    self.set_input(input, email);
                }
                if let Some(input) = self.find_in(Some(form), "input[type=password]") {
                    self.set_input(input, password);
                }
                self.submit_form(form);
                self.reporter.report("Signing you in now...");
            }
            (None, Some(email), Some(password)) => {
                if !self.storefront.login(email, password).await? {
                    return Err(WidgetError::Unauthorized(
                        "That email and password combination didn't work. Please check them and try again.".into(),
                    ));
                }
                self.reporter.report("You're now logged in.");
                self.navigator.navigate("/account")?;
            }
            (Some(form), _, _) => {
                self.doc.scroll_into_view(form, true);
                self.reporter
                    .report("Here's the login form. Enter your email and password to sign in.");
            }
            (None, _, _) => {
                self.navigator.navigate("/account/login")?;
                self.reporter.report("Taking you to the login page.");
            }
        }
        Ok(())
    }

    pub(super) async fn logout(&self) -> Result<(), WidgetError> {
        self.storage.remove(StorageScope::Local, USER_CREDENTIALS_KEY).await;
        self.storage.remove(StorageScope::Local, USER_DATA_KEY).await;

        if let Some(link) = self.doc.query_first(LOGOUT_LINK) {
            // The link navigates away; the next page confirms the logout.
            self.storage
                .set(StorageScope::Session, PENDING_ACTION_KEY, "logout")
                .await;
            self.doc.dispatch(link, DomEventKind::Click);
            self.reporter.report("Logging you out...");
            return Ok(());
        }

        self.storefront.logout().await?;
        self.reporter.report("You've been logged out.");
        Ok(())
    }

    /// Finishes an action that a navigation interrupted on the previous page.
    pub async fn resume_pending_action(&self) {
        let Some(action) = self.storage.get(StorageScope::Session, PENDING_ACTION_KEY).await else {
            return;
        };
        self.storage.remove(StorageScope::Session, PENDING_ACTION_KEY).await;
        info!("resuming pending action '{}'", action);

        match action.as_str() {
            "logout" => {
                if page_has_logout_link(self.doc.as_ref()) {
                    if let Err(e) = self.storefront.logout().await {
                        self.report_failure("logout", e.into());
                        return;
                    }
                }
                self.reporter.report("You've been logged out.");
            }
            other => info!("ignoring unknown pending action '{}'", other),
        }
    }

    pub(super) async fn newsletter_signup(&self, target: &EmailTarget) -> Result<(), WidgetError> {
        let email = required(
            &target.email,
            "email",
            "What email address should I sign up for the newsletter?",
        )?;

        let on_page = self
            .doc
            .query_first(NEWSLETTER_FORM)
            .and_then(|form| self.find_in(Some(form), EMAIL_INPUT).map(|input| (form, input)));
        match on_page {
            Some((form, input)) => {
                self.set_input(input, email);
                self.submit_form(form);
            }
            None => self.storefront.newsletter_signup(email).await?,
        }
        self.reporter
            .report(&format!("Thanks! I've signed {} up for the newsletter.", email));
        Ok(())
    }

    pub(super) async fn account_reset(&self, target: &EmailTarget) -> Result<(), WidgetError> {
        let email = required(
            &target.email,
            "email",
            "What email address is on your account? I'll send a password reset link there.",
        )?;

        let on_page = self
            .doc
            .query_first(RECOVER_FORM)
            .and_then(|form| self.find_in(Some(form), EMAIL_INPUT).map(|input| (form, input)));
        match on_page {
            Some((form, input)) => {
                self.set_input(input, email);
                self.submit_form(form);
            }
            None => self.storefront.recover(email).await?,
        }
        self.reporter.report(&format!(
            "I've requested a password reset link for {}. Please check your inbox.",
            email
        ));
        Ok(())
    }

    pub(super) async fn scheduler(&self, target: &SchedulerTarget) -> Result<(), WidgetError> {
        let date = required(&target.date, "date", "What date would you like to book?")?;
        let when = match target.time.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(time) => format!("{} at {}", date, time.trim()),
            None => date.to_string(),
        };

        let form = target
            .form_id
            .as_deref()
            .and_then(|id| attr_selector("id", id))
            .and_then(|selector| self.doc.query_first(&selector))
            .and_then(|node| self.doc.closest(node, "form"))
            .or_else(|| self.doc.query_first(SCHEDULER_FORM))
            .or_else(|| {
                self.doc
                    .query_first("input[type=date]")
                    .and_then(|node| self.doc.closest(node, "form"))
            });

        if let Some(form) = form {
            let fields = [
                (Some(date), "input[type=date], input[name*=\"date\"]"),
                (target.time.as_deref(), "input[type=time], select[name*=\"time\"], input[name*=\"time\"]"),
                (target.name.as_deref(), "input[name*=\"name\"]"),
                (target.email.as_deref(), "input[type=email], input[name*=\"email\"]"),
                (target.phone.as_deref(), "input[type=tel], input[name*=\"phone\"]"),
                (target.notes.as_deref(), "textarea"),
                (target.service.as_deref(), "select[name*=\"service\"], input[name*=\"service\"]"),
            ];
            for (value, selector) in fields {
                let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
                    continue;
                };
                if let Some(input) = self.find_in(Some(form), selector) {
                    self.set_input(input, value);
                }
            }
            self.submit_form(form);
            self.reporter
                .report(&format!("I've submitted your booking request for {}.", when));
            return Ok(());
        }

        let outcome = self
            .backend
            .proxy(&ProxyRequest {
                action: "schedule_appointment".into(),
                payload: json!({
                    "date": date,
                    "time": target.time,
                    "name": target.name,
                    "email": target.email,
                    "phone": target.phone,
                    "notes": target.notes,
                    "service": target.service,
                }),
            })
            .await?;
        let message = match (outcome.success, outcome.message) {
            (_, Some(message)) if !message.trim().is_empty() => message,
            (true, _) => format!("Your appointment request for {} has been sent.", when),
            (false, _) => format!(
                "I couldn't book an appointment for {} right now. Please try another time or contact the store.",
                when
            ),
        };
        self.reporter.report(&message);
        Ok(())
    }
}
