//! Refund, cancellation, return and exchange requests.
//!
//! Each request walks the same gates in order: order reference, email,
//! logged-in customer, order ownership, item selection (returns and
//! exchanges only) and finally dispatch through the backend proxy. Any
//! failed gate reports to the customer and stops; nothing is retried.

use crate::api::{Backend, LineItem, OrderDetails, OrderLookup, ProxyRequest};
use crate::customer::{page_has_account_link, page_has_logout_link, Customer, CustomerDataLoader};
use crate::dom::Document;
use crate::error::NETWORK_APOLOGY;
use crate::widget::Reporter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderActionKind {
    Refund,
    Cancel,
    Return,
    Exchange,
}

impl OrderActionKind {
    pub fn verb(self) -> &'static str {
        match self {
            OrderActionKind::Refund => "refund",
            OrderActionKind::Cancel => "cancel",
            OrderActionKind::Return => "return",
            OrderActionKind::Exchange => "exchange",
        }
    }

    fn noun(self) -> &'static str {
        match self {
            OrderActionKind::Refund => "refund",
            OrderActionKind::Cancel => "cancellation",
            OrderActionKind::Return => "return",
            OrderActionKind::Exchange => "exchange",
        }
    }

    pub fn proxy_action(self) -> &'static str {
        match self {
            OrderActionKind::Refund => "refund_order",
            OrderActionKind::Cancel => "cancel_order",
            OrderActionKind::Return => "return_order",
            OrderActionKind::Exchange => "exchange_order",
        }
    }

    fn needs_items(self) -> bool {
        matches!(self, OrderActionKind::Return | OrderActionKind::Exchange)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderRequest {
    pub order_id: Option<String>,
    pub order_number: Option<String>,
    pub email: Option<String>,
    pub items: Vec<LineItem>,
    pub reason: Option<String>,
    pub exchange_for: Option<String>,
}

impl OrderRequest {
    fn reference(&self) -> Option<&str> {
        [&self.order_number, &self.order_id]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .map(str::trim)
            .find(|v| !v.is_empty())
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    NeedOrderId,
    NeedEmail,
    NeedLogin,
    Rejected,
    AwaitingItems(Vec<LineItem>),
    Completed,
    Tracked(OrderDetails),
    Failed,
    Busy,
}

/// A return or exchange waiting for the customer to pick items.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSelection {
    pub kind: OrderActionKind,
    pub request: OrderRequest,
    pub lookup: OrderLookup,
    pub items: Vec<LineItem>,
}

pub struct ReturnOrchestrator {
    backend: Arc<dyn Backend>,
    customer: Arc<CustomerDataLoader>,
    doc: Arc<dyn Document>,
    reporter: Arc<dyn Reporter>,
    pending: Mutex<Option<PendingSelection>>,
    in_flight: tokio::sync::Mutex<()>,
}

impl ReturnOrchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        customer: Arc<CustomerDataLoader>,
        doc: Arc<dyn Document>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            backend,
            customer,
            doc,
            reporter,
            pending: Mutex::new(None),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn pending(&self) -> Option<PendingSelection> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn has_pending(&self) -> bool {
        self.pending().is_some()
    }

    fn set_pending(&self, selection: Option<PendingSelection>) {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = selection;
    }

    pub async fn run(&self, kind: OrderActionKind, request: OrderRequest) -> FlowOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            self.reporter
                .report("I'm still working on your previous order request. One moment please.");
            return FlowOutcome::Busy;
        };
        info!("{} flow started", kind.verb());

        let lookup = match self.identify(kind.verb(), &request) {
            Ok(lookup) => lookup,
            Err(outcome) => return outcome,
        };

        if !self.logged_in() {
            self.reporter.report(&format!(
                "Please log in to your account first so I can {} order {}.",
                kind.verb(),
                lookup.display_id()
            ));
            return FlowOutcome::NeedLogin;
        }

        let injected = match self.verify_ownership(&lookup).await {
            Ok(injected) => injected,
            Err(outcome) => return outcome,
        };

        if kind.needs_items() && request.items.is_empty() {
            return self.offer_items(kind, request, lookup, injected).await;
        }

        self.dispatch(kind, &request, &lookup).await
    }

    /// Completes a suspended return/exchange from the customer's reply.
    /// Returns `None` when nothing was pending or the reply named no item;
    /// either way the pending selection is cleared.
    pub async fn resume(&self, text: &str) -> Option<FlowOutcome> {
        let selection = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        let chosen = select_items(&selection.items, text);
        if chosen.is_empty() {
            info!("reply did not select any items; dropping pending {}", selection.kind.verb());
            return None;
        }

        let Ok(_guard) = self.in_flight.try_lock() else {
            self.set_pending(Some(selection));
            return Some(FlowOutcome::Busy);
        };
        let mut request = selection.request;
        request.items = chosen;
        Some(self.dispatch(selection.kind, &request, &selection.lookup).await)
    }

    /// Order status lookup for `track_order`.
    pub async fn track(&self, request: OrderRequest) -> FlowOutcome {
        let lookup = match self.identify("track", &request) {
            Ok(lookup) => lookup,
            Err(outcome) => return outcome,
        };

        let details = match self.injected_order(&lookup) {
            Some(order) => order,
            None => match self.backend.order_details(&lookup).await {
                Ok(details) => details,
                Err(e) => {
                    warn!("order status lookup failed: {:#}", e);
                    self.reporter.report(&format!(
                        "I couldn't look up order {} right now. Please check the order number and email and try again.",
                        lookup.display_id()
                    ));
                    return FlowOutcome::Failed;
                }
            },
        };

        self.reporter.report(&status_message(&lookup, &details));
        FlowOutcome::Tracked(details)
    }

    fn identify(&self, verb: &str, request: &OrderRequest) -> Result<OrderLookup, FlowOutcome> {
        let Some(reference) = request.reference() else {
            self.reporter.report(&format!(
                "Which order would you like to {}? Please share the order number (for example #1001).",
                verb
            ));
            return Err(FlowOutcome::NeedOrderId);
        };
        let Some(email) = request.email() else {
            self.reporter
                .report(&format!("What email address was used to place order {}?", display_ref(reference)));
            return Err(FlowOutcome::NeedEmail);
        };
        Ok(OrderLookup {
            order_id: request.order_id.clone().filter(|v| !v.trim().is_empty()),
            order_number: request.order_number.clone().filter(|v| !v.trim().is_empty()),
            email: email.to_string(),
        })
    }

    fn logged_in(&self) -> bool {
        if self.customer.is_logged_in() {
            return true;
        }
        let context = self.customer.context();
        if context.customer_data.as_ref().and_then(Customer::from_value).is_some()
            || context.shopify_customer.as_ref().and_then(Customer::from_value).is_some()
        {
            return true;
        }
        page_has_account_link(self.doc.as_ref()) && page_has_logout_link(self.doc.as_ref())
    }

    fn known_orders(&self) -> Vec<OrderDetails> {
        let mut orders: Vec<OrderDetails> = self
            .customer
            .snapshot()
            .map(|s| s.recent_orders().to_vec())
            .unwrap_or_default();
        if let Some(customer) = self.customer.context().customer_data.as_ref().and_then(Customer::from_value) {
            orders.extend(customer.orders);
        }
        orders
    }

    fn injected_order(&self, lookup: &OrderLookup) -> Option<OrderDetails> {
        let references: Vec<&str> = [&lookup.order_number, &lookup.order_id]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .collect();
        self.known_orders()
            .into_iter()
            .find(|order| references.iter().any(|r| order.matches(r)))
    }

    /// Ok carries the injected order when ownership was proven locally.
    async fn verify_ownership(&self, lookup: &OrderLookup) -> Result<Option<OrderDetails>, FlowOutcome> {
        if let Some(order) = self.injected_order(lookup) {
            return Ok(Some(order));
        }
        match self.backend.verify_order(lookup).await {
            Ok(verification) if verification.verified => Ok(None),
            Ok(verification) => {
                info!("order {} not verified for customer", lookup.display_id());
                let message = verification.message.unwrap_or_else(|| {
                    format!(
                        "I couldn't verify that order {} belongs to {}. Please double-check the order number and email.",
                        lookup.display_id(),
                        lookup.email
                    )
                });
                self.reporter.report(&message);
                Err(FlowOutcome::Rejected)
            }
            Err(e) => {
                warn!("order verification failed: {:#}", e);
                self.reporter.report(NETWORK_APOLOGY);
                Err(FlowOutcome::Failed)
            }
        }
    }

    async fn offer_items(
        &self,
        kind: OrderActionKind,
        request: OrderRequest,
        lookup: OrderLookup,
        injected: Option<OrderDetails>,
    ) -> FlowOutcome {
        let details = match injected.filter(|order| !order.items.is_empty()) {
            Some(order) => order,
            None => match self.backend.order_details(&lookup).await {
                Ok(details) => details,
                Err(e) => {
                    warn!("order details lookup failed: {:#}", e);
                    self.reporter.report(NETWORK_APOLOGY);
                    return FlowOutcome::Failed;
                }
            },
        };

        if details.items.is_empty() {
            self.reporter.report(&format!(
                "I couldn't find any items on order {} to {}.",
                lookup.display_id(),
                kind.verb()
            ));
            return FlowOutcome::Failed;
        }

        let listing = details
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {}", i + 1, describe_item(item)))
            .collect::<Vec<_>>()
            .join("\n");
        self.reporter.report(&format!(
            "Which items from order {} would you like to {}? Reply with the item numbers or names.\n{}",
            lookup.display_id(),
            kind.verb(),
            listing
        ));

        let items = details.items.clone();
        self.set_pending(Some(PendingSelection {
            kind,
            request,
            lookup,
            items: items.clone(),
        }));
        FlowOutcome::AwaitingItems(items)
    }

    async fn dispatch(&self, kind: OrderActionKind, request: &OrderRequest, lookup: &OrderLookup) -> FlowOutcome {
        let proxy = ProxyRequest {
            action: kind.proxy_action().to_string(),
            payload: json!({
                "orderId": lookup.order_id,
                "orderNumber": lookup.order_number,
                "email": lookup.email,
                "items": request.items,
                "reason": request.reason,
                "exchangeFor": request.exchange_for,
            }),
        };

        match self.backend.proxy(&proxy).await {
            Ok(outcome) if outcome.success => {
                info!("{} submitted for order {}", kind.noun(), lookup.display_id());
                let mut message = format!(
                    "Your {} request for order {} has been submitted. You'll receive a confirmation at {}.",
                    kind.noun(),
                    lookup.display_id(),
                    lookup.email
                );
                if let Some(extra) = outcome.message.filter(|m| !m.trim().is_empty()) {
                    message.push(' ');
                    message.push_str(extra.trim());
                }
                self.reporter.report(&message);
                FlowOutcome::Completed
            }
            Ok(outcome) => {
                warn!("{} rejected by backend: {:?}", kind.noun(), outcome.message);
                self.report_failure(kind, lookup, outcome.message);
                FlowOutcome::Failed
            }
            Err(e) => {
                warn!("{} dispatch failed: {:#}", kind.noun(), e);
                self.report_failure(kind, lookup, None);
                FlowOutcome::Failed
            }
        }
    }

    fn report_failure(&self, kind: OrderActionKind, lookup: &OrderLookup, detail: Option<String>) {
        let mut message = format!(
            "I wasn't able to {} order {} right now.",
            kind.verb(),
            lookup.display_id()
        );
        match detail.filter(|m| !m.trim().is_empty()) {
            Some(detail) => {
                message.push(' ');
                message.push_str(detail.trim());
            }
            None => message.push_str(" Please try again later or contact the store for help."),
        }
        self.reporter.report(&message);
    }
}

fn display_ref(reference: &str) -> String {
    if reference.starts_with('#') {
        reference.to_string()
    } else {
        format!("#{}", reference)
    }
}

fn describe_item(item: &LineItem) -> String {
    let mut text = item.title.clone();
    if let Some(variant) = item.variant_title.as_deref().filter(|v| !v.is_empty()) {
        text.push_str(&format!(" ({})", variant));
    }
    if item.quantity > 1 {
        text.push_str(&format!(" × {}", item.quantity));
    }
    text
}

fn status_message(lookup: &OrderLookup, details: &OrderDetails) -> String {
    let status = details
        .fulfillment_status
        .as_deref()
        .map(|s| s.replace('_', " ").to_lowercase())
        .unwrap_or_else(|| "being processed".to_string());
    let mut message = format!("Order {} is {}.", lookup.display_id(), status);
    if let Some(payment) = details.financial_status.as_deref() {
        message.push_str(&format!(" Payment status: {}.", payment.replace('_', " ").to_lowercase()));
    }
    match (&details.tracking_url, &details.tracking_number) {
        (Some(url), _) => message.push_str(&format!(" You can track the shipment here: {}", url)),
        (None, Some(number)) => message.push_str(&format!(" Tracking number: {}.", number)),
        (None, None) => {}
    }
    message
}

const NEGATIONS: &[&str] = &["not", "no", "never", "dont", "don't"];

/// Lowercased words, apostrophes kept so contractions stay whole.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn is_negation(word: &str) -> bool {
    NEGATIONS.contains(&word) || word.ends_with("n't")
}

/// Items named in `text` by 1-based position or by whole-word title. A
/// bare "all" selects everything only when nothing specific is named and
/// it is not negated.
fn select_items(items: &[LineItem], text: &str) -> Vec<LineItem> {
    let said = words(text);
    let mut chosen: Vec<LineItem> = Vec::new();

    for n in said.iter().filter_map(|w| w.parse::<usize>().ok()) {
        if let Some(item) = n.checked_sub(1).and_then(|i| items.get(i)) {
            if !chosen.contains(item) {
                chosen.push(item.clone());
            }
        }
    }
    if !chosen.is_empty() {
        return chosen;
    }

    for item in items {
        let title = words(&item.title);
        let named = !title.is_empty() && said.windows(title.len()).any(|w| w == title.as_slice());
        if named && !chosen.contains(item) {
            chosen.push(item.clone());
        }
    }
    if !chosen.is_empty() {
        return chosen;
    }

    let everything = said
        .iter()
        .enumerate()
        .any(|(i, w)| w == "all" && !(i > 0 && is_negation(&said[i - 1])));
    if everything {
        items.to_vec()
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{OrderVerification, ProxyOutcome};
    use crate::customer::PageContext;
    use crate::dom::Page;
    use crate::testing::{MockBackend, MockStorefront, RecordingReporter};
    use serde_json::json;

    struct Harness {
        backend: Arc<MockBackend>,
        reporter: Arc<RecordingReporter>,
        flow: ReturnOrchestrator,
    }

    fn harness(context: PageContext) -> Harness {
        let backend = Arc::new(MockBackend::default());
        let reporter = Arc::new(RecordingReporter::default());
        let doc: Arc<dyn Document> = Arc::new(Page::empty());
        let customer = Arc::new(CustomerDataLoader::new(
            backend.clone(),
            Arc::new(MockStorefront::default()),
            doc.clone(),
            context,
        ));
        let flow = ReturnOrchestrator::new(backend.clone(), customer, doc, reporter.clone());
        Harness {
            backend,
            reporter,
            flow,
        }
    }

    fn logged_in() -> PageContext {
        PageContext {
            shopify_customer: Some(json!({"id": 1, "email": "ann@example.com"})),
            ..Default::default()
        }
    }

    fn request(order: &str, email: Option<&str>) -> OrderRequest {
        OrderRequest {
            order_number: Some(order.to_string()),
            email: email.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn refund_without_email_prompts_and_stays_offline() {
        let h = harness(logged_in());
        let outcome = h.flow.run(OrderActionKind::Refund, request("1001", None)).await;
        assert_eq!(outcome, FlowOutcome::NeedEmail);
        assert!(h.reporter.last().unwrap().contains("email"));
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_order_reference_is_asked_for_first() {
        let h = harness(logged_in());
        let outcome = h.flow.run(OrderActionKind::Cancel, OrderRequest::default()).await;
        assert_eq!(outcome, FlowOutcome::NeedOrderId);
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_ownership_never_reaches_the_proxy() {
        let h = harness(logged_in());
        h.backend.set_verification(Ok(OrderVerification {
            verified: false,
            message: None,
        }));
        let outcome = h
            .flow
            .run(OrderActionKind::Refund, request("1001", Some("ann@example.com")))
            .await;
        assert_eq!(outcome, FlowOutcome::Rejected);
        assert!(h.reporter.last().unwrap().contains("couldn't verify"));
        assert_eq!(h.backend.calls(), vec!["verify_order:#1001".to_string()]);
        assert!(h.backend.proxied().is_empty());
    }

    #[tokio::test]
    async fn logged_out_customers_are_asked_to_log_in() {
        let h = harness(PageContext::default());
        let outcome = h
            .flow
            .run(OrderActionKind::Refund, request("1001", Some("ann@example.com")))
            .await;
        assert_eq!(outcome, FlowOutcome::NeedLogin);
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn verified_refund_is_dispatched() {
        let h = harness(logged_in());
        let outcome = h
            .flow
            .run(OrderActionKind::Refund, request("#1001", Some("ann@example.com")))
            .await;
        assert_eq!(outcome, FlowOutcome::Completed);
        let proxied = h.backend.proxied();
        assert_eq!(proxied.len(), 1);
        assert_eq!(proxied[0].action, "refund_order");
        assert_eq!(proxied[0].payload["email"], "ann@example.com");
        assert!(h.reporter.last().unwrap().contains("has been submitted"));
    }

    #[tokio::test]
    async fn injected_orders_skip_backend_verification() {
        let h = harness(PageContext {
            customer_data: Some(json!({"id": 1, "email": "ann@example.com",
                "orders": [{"name": "#1001", "line_items": [{"title": "Tee"}]}]})),
            ..Default::default()
        });
        let outcome = h
            .flow
            .run(OrderActionKind::Cancel, request("1001", Some("ann@example.com")))
            .await;
        assert_eq!(outcome, FlowOutcome::Completed);
        assert_eq!(h.backend.calls(), vec!["proxy:cancel_order".to_string()]);
    }

    #[tokio::test]
    async fn return_without_items_suspends_until_the_next_reply() {
        let h = harness(logged_in());
        h.backend.set_details(json!({
            "name": "#1001",
            "lineItems": [{"title": "Tee", "variantTitle": "M"}, {"title": "Cap", "quantity": 2}]
        }));

        let outcome = h
            .flow
            .run(OrderActionKind::Return, request("1001", Some("ann@example.com")))
            .await;
        assert!(matches!(outcome, FlowOutcome::AwaitingItems(ref items) if items.len() == 2));
        assert!(h.flow.has_pending());
        assert!(h.reporter.last().unwrap().contains("1. Tee (M)"));
        assert!(h.backend.proxied().is_empty());

        let resumed = h.flow.resume("just number 2 please").await;
        assert_eq!(resumed, Some(FlowOutcome::Completed));
        assert!(!h.flow.has_pending());
        let proxied = h.backend.proxied();
        assert_eq!(proxied[0].action, "return_order");
        assert_eq!(proxied[0].payload["items"][0]["title"], "Cap");
    }

    #[tokio::test]
    async fn unrelated_reply_drops_the_pending_selection() {
        let h = harness(logged_in());
        h.backend.set_details(json!({"lineItems": [{"title": "Tee"}]}));
        h.flow
            .run(OrderActionKind::Exchange, request("1001", Some("ann@example.com")))
            .await;
        assert_eq!(h.flow.resume("what's your shipping policy?").await, None);
        assert!(!h.flow.has_pending());
    }

    #[tokio::test]
    async fn proxy_failure_reports_the_failure_template() {
        let h = harness(logged_in());
        h.backend.set_proxy_outcome(Ok(ProxyOutcome {
            success: false,
            message: Some("Order already shipped.".into()),
        }));
        let outcome = h
            .flow
            .run(OrderActionKind::Cancel, request("1001", Some("ann@example.com")))
            .await;
        assert_eq!(outcome, FlowOutcome::Failed);
        assert_eq!(
            h.reporter.last().as_deref(),
            Some("I wasn't able to cancel order #1001 right now. Order already shipped.")
        );
    }

    #[tokio::test]
    async fn tracking_reports_the_status() {
        let h = harness(PageContext::default());
        h.backend.set_details(json!({
            "name": "#1001",
            "fulfillment_status": "IN_TRANSIT",
            "tracking_number": "1Z999"
        }));
        let outcome = h.flow.track(request("1001", Some("ann@example.com"))).await;
        assert!(matches!(outcome, FlowOutcome::Tracked(_)));
        assert_eq!(
            h.reporter.last().as_deref(),
            Some("Order #1001 is in transit. Tracking number: 1Z999.")
        );
    }

    #[test]
    fn item_selection_by_number_title_or_all() {
        let items = vec![
            LineItem {
                title: "Tee".into(),
                quantity: 1,
                ..Default::default()
            },
            LineItem {
                title: "Cap".into(),
                quantity: 1,
                ..Default::default()
            },
        ];
        assert_eq!(select_items(&items, "1")[0].title, "Tee");
        assert_eq!(select_items(&items, "the cap")[0].title, "Cap");
        assert_eq!(select_items(&items, "all of them").len(), 2);
        assert!(select_items(&items, "7").is_empty());
    }

    #[test]
    fn naming_an_item_beats_all() {
        let items = vec![
            LineItem {
                title: "Tee".into(),
                ..Default::default()
            },
            LineItem {
                title: "Cap".into(),
                ..Default::default()
            },
        ];
        let picked = select_items(&items, "not all of them, just the cap");
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].title, "Cap");
        assert!(select_items(&items, "not all").is_empty());
        assert!(select_items(&items, "I don't want all of it back").is_empty());
    }

    #[test]
    fn titles_match_whole_words_only() {
        let items = vec![
            LineItem {
                title: "Tee".into(),
                ..Default::default()
            },
            LineItem {
                title: "Trail Runner (Blue)".into(),
                ..Default::default()
            },
        ];
        assert!(select_items(&items, "is there a guarantee on this?").is_empty());
        assert_eq!(select_items(&items, "the trail runner, blue")[0].title, "Trail Runner (Blue)");
        assert_eq!(select_items(&items, "the tee please")[0].title, "Tee");
    }
}
