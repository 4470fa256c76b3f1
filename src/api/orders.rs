use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLookup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    pub email: String,
}

impl OrderLookup {
    /// The identifier shown to the customer, e.g. `#1001`.
    pub fn display_id(&self) -> String {
        let raw = self
            .order_number
            .as_deref()
            .or(self.order_id.as_deref())
            .unwrap_or_default();
        if raw.starts_with('#') || raw.starts_with("gid://") {
            raw.to_string()
        } else {
            format!("#{}", raw)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OrderVerification {
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default = "one")]
    pub quantity: u32,
    #[serde(default, alias = "variantTitle")]
    pub variant_title: Option<String>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "orderNumber")]
    pub order_number: Option<Value>,
    #[serde(default, alias = "fulfillmentStatus", alias = "displayFulfillmentStatus")]
    pub fulfillment_status: Option<String>,
    #[serde(default, alias = "financialStatus", alias = "displayFinancialStatus")]
    pub financial_status: Option<String>,
    #[serde(default, alias = "lineItems", alias = "line_items")]
    pub items: Vec<LineItem>,
    #[serde(default, alias = "trackingUrl")]
    pub tracking_url: Option<String>,
    #[serde(default, alias = "trackingNumber")]
    pub tracking_number: Option<String>,
}

impl OrderDetails {
    /// True when `reference` names this order by number, name or id.
    /// `#1001`, `1001` and `gid://shopify/Order/1001` all compare equal.
    pub fn matches(&self, reference: &str) -> bool {
        let wanted = normalize_order_ref(reference);
        if wanted.is_empty() {
            return false;
        }
        let number = self.order_number.as_ref().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        [self.name.clone(), number, self.id.clone()]
            .into_iter()
            .flatten()
            .any(|candidate| normalize_order_ref(&candidate) == wanted)
    }
}

fn normalize_order_ref(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw.rsplit('/').next().unwrap_or(raw);
    raw.trim_start_matches('#').trim().to_ascii_lowercase()
}

/// One call through the backend's generic action proxy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyRequest {
    pub action: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProxyOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}
