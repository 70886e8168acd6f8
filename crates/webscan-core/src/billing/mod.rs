//! Billing provider types
//!
//! Typed views over the webhook event envelope and the provider objects the
//! event processor cares about. Events arrive as `{type, data: {object}}`
//! where the object shape depends on the type, so the envelope keeps the
//! object as raw JSON and the processor deserializes per event type.

pub mod signature;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::entitlement::SubscriptionStatus;
use crate::{CoreError, CoreResult};

/// Webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl EventEnvelope {
    pub fn parse(body: &[u8]) -> CoreResult<Self> {
        serde_json::from_slice(body)
            .map_err(|e| CoreError::InvalidPayload(format!("malformed event: {e}")))
    }
}

/// `data.object` of `checkout.session.completed`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: CheckoutMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutMetadata {
    pub user_id: Option<String>,
}

/// `data.object` of `invoice.payment_succeeded`.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub subscription: Option<String>,
}

/// `data.object` of `customer.subscription.*`, and the shape returned when
/// retrieving a subscription from the provider API.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub items: SubscriptionItems,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: SubscriptionPrice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionPrice {
    pub id: String,
}

/// Normalized provider subscription state, the only view the event
/// processor writes from.
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: SubscriptionStatus,
    pub price_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl TryFrom<SubscriptionObject> for ProviderSubscription {
    type Error = CoreError;

    fn try_from(object: SubscriptionObject) -> CoreResult<Self> {
        let status = SubscriptionStatus::parse(&object.status).ok_or_else(|| {
            CoreError::InvalidPayload(format!("unknown subscription status {:?}", object.status))
        })?;
        Ok(ProviderSubscription {
            status,
            price_id: object.items.data.first().map(|i| i.price.id.clone()),
            current_period_start: object.current_period_start.and_then(unix_to_datetime),
            current_period_end: object.current_period_end.and_then(unix_to_datetime),
            id: object.id,
        })
    }
}

fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Read side of the billing provider API.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Retrieve the full subscription object by provider id.
    async fn fetch_subscription(&self, subscription_id: &str) -> CoreResult<ProviderSubscription>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_type_and_object() {
        let env = EventEnvelope::parse(
            br#"{
                "id": "evt_1",
                "type": "customer.subscription.updated",
                "data": {"object": {"id": "sub_1", "status": "active"}}
            }"#,
        )
        .unwrap();
        assert_eq!(env.event_type, "customer.subscription.updated");
        assert_eq!(env.data.object["id"], "sub_1");
    }

    #[test]
    fn envelope_rejects_garbage() {
        assert!(matches!(
            EventEnvelope::parse(b"not json"),
            Err(CoreError::InvalidPayload(_))
        ));
    }

    #[test]
    fn subscription_object_normalizes() {
        let object: SubscriptionObject = serde_json::from_str(
            r#"{
                "id": "sub_9",
                "status": "active",
                "current_period_start": 1700000000,
                "current_period_end": 1702592000,
                "items": {"data": [{"price": {"id": "price_basic"}}]}
            }"#,
        )
        .unwrap();
        let sub = ProviderSubscription::try_from(object).unwrap();
        assert_eq!(sub.id, "sub_9");
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.price_id.as_deref(), Some("price_basic"));
        assert!(sub.current_period_start.unwrap() < sub.current_period_end.unwrap());
    }

    #[test]
    fn unknown_status_is_invalid_payload() {
        let object: SubscriptionObject =
            serde_json::from_str(r#"{"id": "sub_9", "status": "paused"}"#).unwrap();
        assert!(matches!(
            ProviderSubscription::try_from(object),
            Err(CoreError::InvalidPayload(_))
        ));
    }
}
