//! Billing event processor
//!
//! Applies provider webhook events to subscription rows and the denormalized
//! user role. Role writes happen nowhere else. Events are matched by
//! provider-issued ids; an id with no local row is a logged no-op because
//! delivery order across event types is not guaranteed. Replays converge:
//! refreshes are last-write-wins on the fields the event carries.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::billing::{
    BillingProvider, CheckoutSessionObject, EventEnvelope, InvoiceObject, ProviderSubscription,
    SubscriptionObject,
};
use crate::entitlement::Role;
use crate::store::{SubscriptionStore, UserStore};
use crate::{CoreError, CoreResult};

pub struct BillingService {
    users: Arc<dyn UserStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    provider: Arc<dyn BillingProvider>,
}

impl BillingService {
    pub fn new(
        users: Arc<dyn UserStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        provider: Arc<dyn BillingProvider>,
    ) -> Self {
        BillingService {
            users,
            subscriptions,
            provider,
        }
    }

    /// Apply one verified webhook event. Unknown event types are ignored.
    pub async fn handle_event(&self, event: EventEnvelope) -> CoreResult<()> {
        match event.event_type.as_str() {
            "checkout.session.completed" => self.on_checkout_completed(event.data.object).await,
            "invoice.payment_succeeded" => self.on_invoice_paid(event.data.object).await,
            "customer.subscription.updated" => self.on_subscription_updated(event.data.object).await,
            "customer.subscription.deleted" => self.on_subscription_deleted(event.data.object).await,
            other => {
                debug!(event_type = other, "ignoring unhandled billing event");
                Ok(())
            }
        }
    }

    async fn on_checkout_completed(&self, object: serde_json::Value) -> CoreResult<()> {
        let session: CheckoutSessionObject = decode(object)?;

        let Some(user_id) = session.metadata.user_id.as_deref() else {
            warn!("checkout session carries no user id metadata");
            return Ok(());
        };
        let user_id = Uuid::parse_str(user_id)
            .map_err(|_| CoreError::InvalidPayload("malformed user id in metadata".into()))?;

        let Some(subscription_id) = session.subscription.as_deref() else {
            warn!(%user_id, "checkout session carries no subscription id");
            return Ok(());
        };

        let subscription = self.provider.fetch_subscription(subscription_id).await?;
        self.apply_checkout(user_id, &subscription).await?;
        info!(%user_id, subscription_id, "subscription activated");
        Ok(())
    }

    async fn apply_checkout(
        &self,
        user_id: Uuid,
        subscription: &ProviderSubscription,
    ) -> CoreResult<()> {
        self.subscriptions
            .attach_provider_subscription(
                user_id,
                &subscription.id,
                subscription.price_id.as_deref(),
                subscription.status,
                subscription.current_period_start,
                subscription.current_period_end,
            )
            .await?;
        self.users.set_role(user_id, Role::Pro).await
    }

    async fn on_invoice_paid(&self, object: serde_json::Value) -> CoreResult<()> {
        let invoice: InvoiceObject = decode(object)?;

        let Some(subscription_id) = invoice.subscription.as_deref() else {
            // one-off invoices carry no subscription
            return Ok(());
        };

        let subscription = self.provider.fetch_subscription(subscription_id).await?;
        self.refresh(&subscription).await
    }

    async fn on_subscription_updated(&self, object: serde_json::Value) -> CoreResult<()> {
        let object: SubscriptionObject = decode(object)?;
        let subscription = ProviderSubscription::try_from(object)?;
        self.refresh(&subscription).await
    }

    async fn refresh(&self, subscription: &ProviderSubscription) -> CoreResult<()> {
        let matched = self
            .subscriptions
            .refresh_by_provider_id(
                &subscription.id,
                subscription.status,
                subscription.current_period_start,
                subscription.current_period_end,
            )
            .await?;
        if !matched {
            warn!(
                subscription_id = %subscription.id,
                "no local subscription for provider id, skipping refresh"
            );
        }
        Ok(())
    }

    async fn on_subscription_deleted(&self, object: serde_json::Value) -> CoreResult<()> {
        let object: SubscriptionObject = decode(object)?;

        match self.subscriptions.mark_canceled(&object.id).await? {
            Some(user_id) => {
                self.users.set_role(user_id, Role::Free).await?;
                info!(%user_id, subscription_id = %object.id, "subscription canceled");
            }
            None => {
                warn!(
                    subscription_id = %object.id,
                    "no local subscription for provider id, skipping cancel"
                );
            }
        }
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(object: serde_json::Value) -> CoreResult<T> {
    serde_json::from_value(object)
        .map_err(|e| CoreError::InvalidPayload(format!("malformed event object: {e}")))
}
