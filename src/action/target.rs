//! Typed action targets. The backend's `action_context` elements are parsed
//! here, once, into an [`Action`]; handlers never probe raw JSON.

use crate::api::LineItem;
use crate::dom::ElementQuery;
use crate::error::WidgetError;
use crate::returns::{OrderActionKind, OrderRequest};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    Scroll,
    FillForm,
    HighlightText,
    Login,
    Logout,
    NewsletterSignup,
    AccountReset,
    Subscription,
    Purchase,
    TrackOrder,
    Order(OrderActionKind),
    GetOrders,
    Scheduler,
    Redirect,
}

/// Canonical names first, then the irregular spellings the backend has used.
const NAMES: &[(&str, ActionKind)] = &[
    ("click", ActionKind::Click),
    ("scroll", ActionKind::Scroll),
    ("fill_form", ActionKind::FillForm),
    ("highlight_text", ActionKind::HighlightText),
    ("login", ActionKind::Login),
    ("logout", ActionKind::Logout),
    ("newsletter_signup", ActionKind::NewsletterSignup),
    ("account_reset", ActionKind::AccountReset),
    ("subscription", ActionKind::Subscription),
    ("purchase", ActionKind::Purchase),
    ("track_order", ActionKind::TrackOrder),
    ("process_return", ActionKind::Order(OrderActionKind::Return)),
    ("refund", ActionKind::Order(OrderActionKind::Refund)),
    ("cancel", ActionKind::Order(OrderActionKind::Cancel)),
    ("exchange", ActionKind::Order(OrderActionKind::Exchange)),
    ("get_orders", ActionKind::GetOrders),
    ("scheduler", ActionKind::Scheduler),
    ("redirect", ActionKind::Redirect),
    // aliases
    ("form_fill", ActionKind::FillForm),
    ("highlight", ActionKind::HighlightText),
    ("sign_in", ActionKind::Login),
    ("sign_out", ActionKind::Logout),
    ("newsletter", ActionKind::NewsletterSignup),
    ("reset_password", ActionKind::AccountReset),
    ("password_reset", ActionKind::AccountReset),
    ("subscription_action", ActionKind::Subscription),
    ("manage_subscription", ActionKind::Subscription),
    ("add_to_cart", ActionKind::Purchase),
    ("buy", ActionKind::Purchase),
    ("order_status", ActionKind::TrackOrder),
    ("return", ActionKind::Order(OrderActionKind::Return)),
    ("return_order", ActionKind::Order(OrderActionKind::Return)),
    ("refund_order", ActionKind::Order(OrderActionKind::Refund)),
    ("cancel_order", ActionKind::Order(OrderActionKind::Cancel)),
    ("exchange_order", ActionKind::Order(OrderActionKind::Exchange)),
    ("orders", ActionKind::GetOrders),
    ("schedule", ActionKind::Scheduler),
    ("book_appointment", ActionKind::Scheduler),
    ("navigate", ActionKind::Redirect),
];

/// `fillForm`, `Fill-Form` and ` fill form ` all become `fill_form`.
pub fn normalize_name(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for c in raw.trim().chars() {
        if c.is_uppercase() && prev_lower {
            name.push('_');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        match c {
            '-' | ' ' => name.push('_'),
            c => name.extend(c.to_lowercase()),
        }
    }
    name
}

impl ActionKind {
    pub fn resolve(raw: &str) -> Option<Self> {
        let name = normalize_name(raw);
        NAMES.iter().find(|(n, _)| *n == name).map(|(_, kind)| *kind)
    }

    /// Builds the typed action from one context element. `None` stands for
    /// an absent context and yields the kind's empty target.
    pub fn parse(self, context: Option<&Value>) -> Result<Action, WidgetError> {
        let raw = match context {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(Value::Object(_)) => context.cloned().unwrap_or_default(),
            Some(other) => {
                return Err(WidgetError::InvalidTarget(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };

        fn typed<T: for<'de> Deserialize<'de>>(raw: Value) -> Result<T, WidgetError> {
            serde_json::from_value(raw).map_err(|e| WidgetError::InvalidTarget(e.to_string()))
        }

        Ok(match self {
            ActionKind::Click => Action::Click(typed(raw)?),
            ActionKind::Scroll => Action::Scroll(typed(raw)?),
            ActionKind::FillForm => Action::FillForm(typed(raw)?),
            ActionKind::HighlightText => Action::HighlightText(typed(raw)?),
            ActionKind::Login => Action::Login(typed(raw)?),
            ActionKind::Logout => Action::Logout,
            ActionKind::NewsletterSignup => Action::NewsletterSignup(typed(raw)?),
            ActionKind::AccountReset => Action::AccountReset(typed(raw)?),
            ActionKind::Subscription => Action::Subscription(typed(raw)?),
            ActionKind::Purchase => Action::Purchase(typed(raw)?),
            ActionKind::TrackOrder => Action::TrackOrder(typed(raw)?),
            ActionKind::Order(kind) => Action::Order(kind, typed(raw)?),
            ActionKind::GetOrders => Action::GetOrders,
            ActionKind::Scheduler => Action::Scheduler(typed(raw)?),
            ActionKind::Redirect => Action::Redirect(typed(raw)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click(ElementQuery),
    Scroll(ScrollTarget),
    FillForm(FormTarget),
    HighlightText(HighlightTarget),
    Login(LoginTarget),
    Logout,
    NewsletterSignup(EmailTarget),
    AccountReset(EmailTarget),
    Subscription(SubscriptionTarget),
    Purchase(PurchaseTarget),
    TrackOrder(OrderTarget),
    Order(OrderActionKind, OrderTarget),
    GetOrders,
    Scheduler(SchedulerTarget),
    Redirect(RedirectTarget),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScrollTarget {
    #[serde(flatten)]
    pub query: ElementQuery,
    /// `top`, `bottom`, `up` or `down` when no element is named.
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FormTarget {
    #[serde(default, alias = "formId")]
    pub form_id: Option<String>,
    #[serde(default, alias = "formType")]
    pub form_type: Option<String>,
    #[serde(default, alias = "inputFields", alias = "fields")]
    pub input_fields: Vec<InputField>,
    #[serde(default, alias = "autoSubmit")]
    pub auto_submit: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InputField {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub value: Value,
}

impl InputField {
    pub fn text_value(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn truthy(&self) -> bool {
        match &self.value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
            Value::String(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "on" | "yes" | "1" | "checked"
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HighlightTarget {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default, alias = "exactText", alias = "text")]
    pub exact_text: Option<String>,
    #[serde(default = "default_true", alias = "scrollTo", alias = "scroll")]
    pub scroll_to: bool,
}

impl Default for HighlightTarget {
    fn default() -> Self {
        Self {
            selector: None,
            exact_text: None,
            scroll_to: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoginTarget {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmailTarget {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubscriptionTarget {
    /// subscribe, unsubscribe, pause, resume, cancel, skip
    #[serde(default, alias = "subscription_action", alias = "type")]
    pub action: Option<String>,
    #[serde(default, alias = "subscriptionId", deserialize_with = "lenient_string")]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub query: ElementQuery,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PurchaseTarget {
    #[serde(default, alias = "productName", alias = "product")]
    pub product_name: Option<String>,
    #[serde(default, alias = "variantId", alias = "variant_id_number", deserialize_with = "lenient_string")]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(flatten)]
    pub query: ElementQuery,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OrderTarget {
    #[serde(default, alias = "orderId", deserialize_with = "lenient_string")]
    pub order_id: Option<String>,
    #[serde(default, alias = "orderNumber", deserialize_with = "lenient_string")]
    pub order_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "line_items", alias = "lineItems")]
    pub items: Vec<ItemRef>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, alias = "exchangeFor", alias = "exchange_item")]
    pub exchange_for: Option<String>,
}

/// Items may be named by title alone or given in full.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ItemRef {
    Title(String),
    Item(LineItem),
}

impl From<OrderTarget> for OrderRequest {
    fn from(target: OrderTarget) -> Self {
        OrderRequest {
            order_id: target.order_id,
            order_number: target.order_number,
            email: target.email,
            items: target
                .items
                .into_iter()
                .map(|item| match item {
                    ItemRef::Title(title) => LineItem {
                        title,
                        quantity: 1,
                        ..Default::default()
                    },
                    ItemRef::Item(item) => item,
                })
                .collect(),
            reason: target.reason,
            exchange_for: target.exchange_for,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SchedulerTarget {
    #[serde(default, alias = "formId")]
    pub form_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, alias = "message")]
    pub notes: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RedirectTarget {
    #[serde(default, alias = "href")]
    pub url: Option<String>,
}

/// Accepts strings or numbers; blank strings become `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
