//! Billing webhook verification and event model.
//!
//! Inbound events are authenticated by recomputing an HMAC-SHA256 signature
//! over the raw, unparsed request body against the shared webhook secret.
//! Verification always happens before any parsing or dispatch.

use mongodb::bson::DateTime;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::utils::signature;

use crate::models::SubscriptionStatus;

pub const SIGNATURE_HEADER: &str = "x-billing-signature";

/// Billing event, dispatched by its declared kind.
///
/// The set of kinds this gateway acts on is closed; anything else parses as
/// `Unknown` and is acknowledged without side effects.
#[derive(Debug)]
pub enum BillingEvent {
    CheckoutCompleted(CheckoutPayload),
    SubscriptionCreated(SubscriptionPayload),
    SubscriptionUpdated(SubscriptionPayload),
    SubscriptionDeleted(SubscriptionPayload),
    TrialWillEnd(SubscriptionPayload),
    Unknown { kind: String },
}

/// Raw wire shape: a declared kind plus an opaque payload, typed per kind
/// during dispatch.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Fields read from a completed checkout. The internal user id is embedded by
/// the checkout collaborator; its absence is tolerated but leaves the customer
/// unlinked.
#[derive(Debug, Deserialize, Clone)]
pub struct CheckoutPayload {
    pub customer: Option<String>,
    pub user_id: Option<String>,
}

/// Fields read from a subscription lifecycle event.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubscriptionPayload {
    pub id: String,
    pub customer: Option<String>,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub items: Vec<SubscriptionItem>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubscriptionItem {
    pub price_id: Option<String>,
}

impl SubscriptionPayload {
    /// Price id of the first line item, the one that determines the tier.
    pub fn first_price_id(&self) -> Option<&str> {
        self.items.first().and_then(|item| item.price_id.as_deref())
    }
}

/// A subscription event that arrived before its checkout link. Parked by
/// customer id and replayed once the link exists, instead of being dropped.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PendingBillingEvent {
    pub customer_id: String,
    pub payload: SubscriptionPayload,
    pub received_at: DateTime,
}

/// Verifier for inbound billing webhooks.
#[derive(Clone)]
pub struct BillingWebhook {
    webhook_secret: Secret<String>,
}

impl BillingWebhook {
    pub fn new(webhook_secret: Secret<String>) -> Self {
        Self { webhook_secret }
    }

    /// Verify the detached signature over the raw request body.
    ///
    /// An unset webhook secret fails verification for every body; the
    /// endpoint stays closed rather than open.
    pub fn verify_signature(&self, body: &str, signature_header: &str) -> anyhow::Result<bool> {
        let secret = self.webhook_secret.expose_secret();
        if secret.is_empty() {
            tracing::warn!("billing webhook secret is not configured");
            return Ok(false);
        }

        signature::verify(secret, body, signature_header)
    }

    /// Parse the raw body into a typed event. Call only after verification.
    pub fn parse_event(&self, body: &str) -> Result<BillingEvent, serde_json::Error> {
        let envelope: EventEnvelope = serde_json::from_str(body)?;
        let event = match envelope.kind.as_str() {
            "checkout.completed" => {
                BillingEvent::CheckoutCompleted(serde_json::from_value(envelope.data)?)
            }
            "subscription.created" => {
                BillingEvent::SubscriptionCreated(serde_json::from_value(envelope.data)?)
            }
            "subscription.updated" => {
                BillingEvent::SubscriptionUpdated(serde_json::from_value(envelope.data)?)
            }
            "subscription.deleted" => {
                BillingEvent::SubscriptionDeleted(serde_json::from_value(envelope.data)?)
            }
            "subscription.trial_will_end" => {
                BillingEvent::TrialWillEnd(serde_json::from_value(envelope.data)?)
            }
            _ => BillingEvent::Unknown {
                kind: envelope.kind,
            },
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook() -> BillingWebhook {
        BillingWebhook::new(Secret::new("test_webhook_secret".to_string()))
    }

    #[test]
    fn test_valid_signature() {
        let webhook = webhook();
        let body = r#"{"type":"subscription.updated","data":{"id":"sub_1","status":"active"}}"#;
        let sig = signature::sign("test_webhook_secret", body).unwrap();

        assert!(webhook.verify_signature(body, &sig).unwrap());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let webhook = webhook();
        let body = r#"{"type":"subscription.updated","data":{"id":"sub_1","status":"active"}}"#;
        let sig = signature::sign("test_webhook_secret", body).unwrap();

        let tampered = body.replace("active", "canceled");
        assert!(!webhook.verify_signature(&tampered, &sig).unwrap());
    }

    #[test]
    fn test_missing_secret_rejects_everything() {
        let webhook = BillingWebhook::new(Secret::new(String::new()));
        let body = r#"{"type":"subscription.updated"}"#;
        let sig = signature::sign("", body).unwrap();

        assert!(!webhook.verify_signature(body, &sig).unwrap());
    }

    #[test]
    fn test_parse_checkout_event() {
        let body = r#"{
            "type": "checkout.completed",
            "data": {"customer": "cus_1", "user_id": "u1"}
        }"#;
        let event = webhook().parse_event(body).unwrap();
        match event {
            BillingEvent::CheckoutCompleted(payload) => {
                assert_eq!(payload.customer.as_deref(), Some("cus_1"));
                assert_eq!(payload.user_id.as_deref(), Some("u1"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_subscription_event_with_items() {
        let body = r#"{
            "type": "subscription.updated",
            "data": {
                "id": "sub_1",
                "customer": "cus_1",
                "status": "active",
                "items": [{"price_id": "price_pro"}],
                "current_period_end": 1760000000,
                "cancel_at_period_end": false
            }
        }"#;
        let event = webhook().parse_event(body).unwrap();
        match event {
            BillingEvent::SubscriptionUpdated(payload) => {
                assert_eq!(payload.first_price_id(), Some("price_pro"));
                assert_eq!(payload.status, SubscriptionStatus::Active);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_parses_as_unknown() {
        let body = r#"{"type":"invoice.paid","data":{"id":"in_1"}}"#;
        let event = webhook().parse_event(body).unwrap();
        match event {
            BillingEvent::Unknown { kind } => assert_eq!(kind, "invoice.paid"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_future_status_is_not_entitled() {
        let body = r#"{
            "type": "subscription.updated",
            "data": {"id": "sub_1", "customer": "cus_1", "status": "superseded"}
        }"#;
        let event = webhook().parse_event(body).unwrap();
        match event {
            BillingEvent::SubscriptionUpdated(payload) => {
                assert_eq!(payload.status, SubscriptionStatus::Unknown);
                assert!(!payload.status.is_entitled());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
