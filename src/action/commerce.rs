use super::target::{PurchaseTarget, SubscriptionTarget};
use super::ActionHandler;
use crate::api::ProxyRequest;
use crate::dom::{find_element, DomEventKind, ElementQuery};
use crate::error::WidgetError;
use serde_json::json;
use tracing::info;

const ADD_TO_CART_FORM: &str = "form[action*=\"/cart/add\"]";

impl ActionHandler {
    pub(super) async fn purchase(&self, target: &PurchaseTarget) -> Result<(), WidgetError> {
        let quantity = target.quantity.unwrap_or(1).max(1);
        let label = target
            .product_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("that item");
        let added = if quantity > 1 {
            format!("Added {} × {} to your cart.", quantity, label)
        } else {
            format!("Added {} to your cart.", label)
        };

        if let Some(variant) = target.variant_id.as_deref() {
            self.storefront.add_to_cart(variant, quantity).await?;
            info!("added variant {} x{} through the cart endpoint", variant, quantity);
            self.reporter.report(&added);
            return Ok(());
        }

        if !target.query.is_empty() {
            let button = self.locate(&target.query)?;
            self.doc.dispatch(button, DomEventKind::Click);
            self.reporter.report(&added);
            return Ok(());
        }

        if let Some(form) = self.doc.query_first(ADD_TO_CART_FORM) {
            if quantity > 1 {
                if let Some(input) = self.doc.query_within(form, "input[name=quantity]").into_iter().next() {
                    self.doc.set_value(input, &quantity.to_string());
                    self.doc.dispatch(input, DomEventKind::Change);
                }
            }
            self.submit_form(form);
            self.reporter.report(&added);
            return Ok(());
        }

        let fallback = ElementQuery {
            button_text: Some("Add to cart".into()),
            ..Default::default()
        };
        match find_element(self.doc.as_ref(), &fallback) {
            Some(button) => {
                self.doc.dispatch(button, DomEventKind::Click);
                self.reporter.report(&added);
                Ok(())
            }
            None => {
                self.reporter.report(&format!(
                    "I couldn't find a way to add {} to your cart on this page. Try opening the product page first.",
                    label
                ));
                Err(WidgetError::not_found("add to cart control"))
            }
        }
    }

    pub(super) async fn subscription(&self, target: &SubscriptionTarget) -> Result<(), WidgetError> {
        let action = target
            .action
            .as_deref()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| "manage".to_string());

        let query = if !target.query.is_empty() {
            Some(target.query.clone())
        } else if action != "manage" {
            Some(ElementQuery {
                button_text: Some(format!("{} subscription", action)),
                ..Default::default()
            })
        } else {
            None
        };
        if let Some(control) = query.and_then(|q| find_element(self.doc.as_ref(), &q)) {
            self.doc.dispatch(control, DomEventKind::Click);
            self.reporter
                .report(&format!("Done. I've selected the {} option for your subscription.", action));
            return Ok(());
        }

        let snapshot = self.customer.init().await;
        if !snapshot.is_logged_in {
            return Err(WidgetError::Unauthorized(
                "Please log in to your account so I can manage your subscription.".into(),
            ));
        }
        let email = target
            .email
            .clone()
            .or_else(|| snapshot.customer.as_ref().and_then(|c| c.email.clone()));
        let outcome = self
            .backend
            .proxy(&ProxyRequest {
                action: "subscription".into(),
                payload: json!({
                    "action": action,
                    "subscriptionId": target.subscription_id,
                    "email": email,
                    "customerId": snapshot.customer.as_ref().and_then(|c| c.id.clone()),
                }),
            })
            .await?;

        let message = match (outcome.success, outcome.message) {
            (_, Some(message)) if !message.trim().is_empty() => message,
            (true, _) => format!("Your subscription has been updated ({}).", action),
            (false, _) => "I couldn't update your subscription right now. Please try again later.".to_string(),
        };
        self.reporter.report(&message);
        Ok(())
    }

    pub(super) async fn get_orders(&self) -> Result<(), WidgetError> {
        let snapshot = self.customer.init().await;
        if !snapshot.is_logged_in {
            return Err(WidgetError::Unauthorized(
                "Please log in to your account so I can look up your orders.".into(),
            ));
        }

        let orders = snapshot.recent_orders();
        if !orders.is_empty() {
            let lines = orders
                .iter()
                .map(|order| {
                    let name = order
                        .name
                        .clone()
                        .or_else(|| order.id.clone())
                        .unwrap_or_else(|| "Order".to_string());
                    let status = order
                        .fulfillment_status
                        .as_deref()
                        .map(|s| s.replace('_', " ").to_lowercase())
                        .unwrap_or_else(|| "processing".to_string());
                    format!("- {}: {}", name, status)
                })
                .collect::<Vec<_>>()
                .join("\n");
            self.reporter
                .report(&format!("Here are your recent orders:\n{}", lines));
            return Ok(());
        }

        let customer = snapshot.customer.as_ref();
        let outcome = self
            .backend
            .proxy(&ProxyRequest {
                action: "get_orders".into(),
                payload: json!({
                    "customerId": customer.and_then(|c| c.id.clone()),
                    "email": customer.and_then(|c| c.email.clone()),
                }),
            })
            .await?;
        let message = outcome
            .message
            .filter(|m| outcome.success && !m.trim().is_empty())
            .unwrap_or_else(|| "I couldn't find any orders on your account yet.".to_string());
        self.reporter.report(&message);
        Ok(())
    }
}
