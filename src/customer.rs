//! Best-effort collection of logged-in customer and cart context.
//!
//! Identity is resolved from the first source that yields a signal, in a
//! fixed order: injected customer object, injected customer id, the
//! platform's global customer, a token-authenticated backend lookup, and
//! finally the page's account links. Cart data is loaded alongside and its
//! failure never blocks identity.

use crate::api::{Backend, OrderDetails, Storefront};
use crate::dom::{normalize_text, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub orders: Vec<OrderDetails>,
}

impl Customer {
    /// Lenient parse of the shapes hosts inject (`firstName` or
    /// `first_name`, numeric or string ids). Returns `None` when the value
    /// carries neither an id nor an email.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let field = |names: &[&str]| {
            names.iter().find_map(|n| match obj.get(*n) {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        };

        let orders = obj
            .get("orders")
            .and_then(Value::as_array)
            .map(|orders| {
                orders
                    .iter()
                    .filter_map(|o| serde_json::from_value::<OrderDetails>(stringify_id(o)).ok())
                    .collect()
            })
            .unwrap_or_default();

        let customer = Customer {
            id: field(&["id", "customerId", "customer_id"]),
            email: field(&["email"]),
            first_name: field(&["first_name", "firstName"]),
            last_name: field(&["last_name", "lastName"]),
            orders,
        };
        if customer.id.is_none() && customer.email.is_none() {
            return None;
        }
        Some(customer)
    }

    pub fn display_name(&self) -> Option<String> {
        self.first_name.clone().or_else(|| self.email.clone())
    }
}

fn stringify_id(order: &Value) -> Value {
    let mut order = order.clone();
    if let Some(Value::Number(n)) = order.get("id") {
        let id = n.to_string();
        order["id"] = Value::String(id);
    }
    order
}

/// Session-token sources, highest priority first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSources {
    #[serde(default)]
    pub app_bridge_method: Option<String>,
    #[serde(default)]
    pub override_hook: Option<String>,
    #[serde(default)]
    pub checkout_token: Option<String>,
    #[serde(default)]
    pub meta_tag: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub standard_app_bridge: Option<String>,
}

impl TokenSources {
    pub fn first(&self) -> Option<&str> {
        [
            &self.app_bridge_method,
            &self.override_hook,
            &self.checkout_token,
            &self.meta_tag,
            &self.cookie,
            &self.standard_app_bridge,
        ]
        .into_iter()
        .filter_map(|t| t.as_deref())
        .map(str::trim)
        .find(|t| !t.is_empty())
    }
}

/// Values the host template injects into the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    /// `__VoiceroCustomerData`
    #[serde(default)]
    pub customer_data: Option<Value>,
    /// `__VoiceroCustomerId`
    #[serde(default)]
    pub customer_id: Option<String>,
    /// `Shopify.customer`
    #[serde(default)]
    pub shopify_customer: Option<Value>,
    #[serde(default)]
    pub tokens: TokenSources,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerSource {
    InjectedData,
    InjectedId,
    PlatformGlobal,
    TokenApi,
    DomHeuristic,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub is_logged_in: bool,
    pub customer: Option<Customer>,
    pub cart: Option<Value>,
    pub errors: Vec<String>,
    pub source: Option<CustomerSource>,
}

impl CustomerSnapshot {
    pub fn recent_orders(&self) -> &[OrderDetails] {
        self.customer.as_ref().map(|c| c.orders.as_slice()).unwrap_or(&[])
    }
}

/// `a[href="/account"]`-style link that only signed-in customers see.
pub fn page_has_account_link(doc: &dyn Document) -> bool {
    doc.query_all("a[href*=\"/account\"]").into_iter().any(|id| {
        let href = doc.attribute(id, "href").unwrap_or_default();
        let path = href
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/');
        let text = normalize_text(&doc.text_content(id)).to_lowercase();
        let guest_text = ["log in", "login", "sign in", "register", "create account"]
            .iter()
            .any(|t| text.contains(t));
        path.ends_with("/account") && !guest_text
    })
}

pub fn page_has_logout_link(doc: &dyn Document) -> bool {
    doc.query_first("a[href*=\"/account/logout\"]").is_some()
}

pub struct CustomerDataLoader {
    backend: Arc<dyn Backend>,
    storefront: Arc<dyn Storefront>,
    doc: Arc<dyn Document>,
    context: RwLock<PageContext>,
    snapshot: Mutex<Arc<OnceCell<CustomerSnapshot>>>,
}

impl CustomerDataLoader {
    pub fn new(
        backend: Arc<dyn Backend>,
        storefront: Arc<dyn Storefront>,
        doc: Arc<dyn Document>,
        context: PageContext,
    ) -> Self {
        Self {
            backend,
            storefront,
            doc,
            context: RwLock::new(context),
            snapshot: Mutex::new(Arc::new(OnceCell::new())),
        }
    }

    /// Loads the snapshot once per page; later calls return the cached copy
    /// without touching the network.
    pub async fn init(&self) -> CustomerSnapshot {
        let cell = self
            .snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        cell.get_or_init(|| self.load()).await.clone()
    }

    /// The snapshot if `init` has completed.
    pub fn snapshot(&self) -> Option<CustomerSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get()
            .cloned()
    }

    pub fn is_logged_in(&self) -> bool {
        self.snapshot().is_some_and(|s| s.is_logged_in)
    }

    pub fn context(&self) -> PageContext {
        self.context.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// A new page was loaded: forget the cached snapshot.
    pub fn reload(&self, context: PageContext) {
        *self.context.write().unwrap_or_else(|e| e.into_inner()) = context;
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(OnceCell::new());
    }

    async fn load(&self) -> CustomerSnapshot {
        let context = self.context();
        let mut errors = Vec::new();

        let (identity, cart) = tokio::join!(
            self.resolve_identity(&context),
            self.storefront.cart()
        );
        let (customer, source, identity_errors) = identity;
        errors.extend(identity_errors);

        let cart = match cart {
            Ok(cart) => Some(cart),
            Err(e) => {
                warn!("cart load failed: {:#}", e);
                errors.push(format!("cart: {:#}", e));
                None
            }
        };

        let snapshot = CustomerSnapshot {
            is_logged_in: source.is_some(),
            customer,
            cart,
            errors,
            source,
        };
        info!(
            "customer data loaded: logged_in={} source={:?}",
            snapshot.is_logged_in, snapshot.source
        );
        snapshot
    }

    async fn resolve_identity(
        &self,
        context: &PageContext,
    ) -> (Option<Customer>, Option<CustomerSource>, Vec<String>) {
        let mut errors = Vec::new();
        let token = context.tokens.first();

        if let Some(customer) = context.customer_data.as_ref().and_then(Customer::from_value) {
            return (Some(customer), Some(CustomerSource::InjectedData), errors);
        }

        if let Some(id) = context.customer_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            let bare = Customer {
                id: Some(id.to_string()),
                ..Default::default()
            };
            let customer = match token {
                Some(token) => match self.backend.fetch_customer(token, Some(id)).await {
                    Ok(Some(detailed)) => detailed,
                    Ok(None) => bare,
                    Err(e) => {
                        warn!("customer enrichment failed: {:#}", e);
                        errors.push(format!("customer enrichment: {:#}", e));
                        bare
                    }
                },
                None => bare,
            };
            return (Some(customer), Some(CustomerSource::InjectedId), errors);
        }

        if let Some(customer) = context.shopify_customer.as_ref().and_then(Customer::from_value) {
            return (Some(customer), Some(CustomerSource::PlatformGlobal), errors);
        }

        if let Some(token) = token {
            match self.backend.fetch_customer(token, None).await {
                Ok(Some(customer)) => return (Some(customer), Some(CustomerSource::TokenApi), errors),
                Ok(None) => debug!("token lookup found no customer"),
                Err(e) => {
                    warn!("token customer lookup failed: {:#}", e);
                    errors.push(format!("customer lookup: {:#}", e));
                }
            }
        }

        if page_has_logout_link(self.doc.as_ref()) || page_has_account_link(self.doc.as_ref()) {
            return (None, Some(CustomerSource::DomHeuristic), errors);
        }

        (None, None, errors)
    }
}
