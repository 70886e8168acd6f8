//! Minimal Stripe REST client
//!
//! Form-encoded calls against the v1 API with bearer auth, covering exactly
//! the surface this service needs: retrieving subscriptions for webhook
//! processing and creating customers, checkout sessions and billing portal
//! sessions for the upgrade flow.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use webscan_core::billing::{BillingProvider, ProviderSubscription, SubscriptionObject};
use webscan_core::{CoreError, CoreResult};

const DEFAULT_API_BASE: &str = "https://api.stripe.com";
const PRO_PLAN_NAME: &str = "Webscan Pro";
const PRO_PLAN_DESCRIPTION: &str = "Unlimited scans, PDF/CSV exports, and priority support";
const PRO_PLAN_AMOUNT_CENTS: &str = "2900";

pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    url: Option<String>,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            secret_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base.trim_end_matches('/'))
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> CoreResult<T> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await
            .map_err(|e| CoreError::BackendUnavailable(format!("billing provider: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::BackendUnavailable(format!(
                "billing provider returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CoreError::InvalidPayload(format!("billing provider response: {e}")))
    }

    pub async fn create_customer(&self, email: &str, name: Option<&str>) -> CoreResult<String> {
        let mut params = vec![("email".to_string(), email.to_string())];
        if let Some(name) = name {
            params.push(("name".to_string(), name.to_string()));
        }
        let customer: CustomerResponse = self.post_form("/v1/customers", &params).await?;
        Ok(customer.id)
    }

    /// Hosted checkout session for the monthly pro plan, carrying the user id
    /// in metadata for the completion webhook.
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        user_id: Uuid,
        success_url: &str,
        cancel_url: &str,
    ) -> CoreResult<String> {
        let params: Vec<(String, String)> = vec![
            ("customer".into(), customer_id.to_string()),
            ("mode".into(), "subscription".into()),
            ("payment_method_types[0]".into(), "card".into()),
            ("billing_address_collection".into(), "required".into()),
            ("allow_promotion_codes".into(), "true".into()),
            (
                "line_items[0][price_data][currency]".into(),
                "usd".into(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                PRO_PLAN_NAME.into(),
            ),
            (
                "line_items[0][price_data][product_data][description]".into(),
                PRO_PLAN_DESCRIPTION.into(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                PRO_PLAN_AMOUNT_CENTS.into(),
            ),
            (
                "line_items[0][price_data][recurring][interval]".into(),
                "month".into(),
            ),
            ("line_items[0][quantity]".into(), "1".into()),
            ("success_url".into(), success_url.to_string()),
            ("cancel_url".into(), cancel_url.to_string()),
            ("metadata[user_id]".into(), user_id.to_string()),
        ];

        let session: SessionResponse = self.post_form("/v1/checkout/sessions", &params).await?;
        session.url.ok_or_else(|| {
            CoreError::InvalidPayload("checkout session has no hosted url".into())
        })
    }

    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> CoreResult<String> {
        let params = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];
        let session: SessionResponse = self
            .post_form("/v1/billing_portal/sessions", &params)
            .await?;
        session
            .url
            .ok_or_else(|| CoreError::InvalidPayload("portal session has no url".into()))
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn fetch_subscription(&self, subscription_id: &str) -> CoreResult<ProviderSubscription> {
        let response = self
            .client
            .get(self.url(&format!("/v1/subscriptions/{subscription_id}")))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| CoreError::BackendUnavailable(format!("billing provider: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound("subscription".into()));
        }
        if !response.status().is_success() {
            return Err(CoreError::BackendUnavailable(format!(
                "billing provider returned {}",
                response.status()
            )));
        }

        let object: SubscriptionObject = response
            .json()
            .await
            .map_err(|e| CoreError::InvalidPayload(format!("billing provider response: {e}")))?;
        ProviderSubscription::try_from(object)
    }
}
