//! Billing routes
//!
//! The webhook route verifies the provider signature against the raw body
//! before anything is parsed; checkout/portal create hosted sessions for the
//! authenticated user.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use webscan_core::billing::signature;
use webscan_core::billing::EventEnvelope;
use webscan_core::CoreError;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

const SIGNATURE_HEADER: &str = "stripe-signature";

pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(CoreError::InvalidSignature)?;

    signature::verify(
        &body,
        header,
        &state.config.stripe_webhook_secret,
        signature::DEFAULT_TOLERANCE_SECS,
        Utc::now().timestamp(),
    )?;

    let event = EventEnvelope::parse(&body)?;
    state.billing.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}

#[derive(Serialize)]
pub struct SessionUrlResponse {
    pub url: String,
}

pub async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SessionUrlResponse>, ApiError> {
    let user = state
        .users
        .get(auth.user_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("user".to_string()))?;

    let existing = state.subscriptions.latest_for_user(auth.user_id).await?;
    let customer_id = match existing.and_then(|sub| sub.stripe_customer_id) {
        Some(customer_id) => customer_id,
        None => {
            let customer_id = state
                .stripe
                .create_customer(&user.email, user.name.as_deref())
                .await?;
            state
                .subscriptions
                .upsert_customer(auth.user_id, &customer_id)
                .await?;
            customer_id
        }
    };

    let base = &state.config.app_base_url;
    let url = state
        .stripe
        .create_checkout_session(
            &customer_id,
            auth.user_id,
            &format!("{base}/dashboard?success=true"),
            &format!("{base}/dashboard?canceled=true"),
        )
        .await?;

    Ok(Json(SessionUrlResponse { url }))
}

pub async fn create_portal_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<SessionUrlResponse>, ApiError> {
    let customer_id = state
        .subscriptions
        .latest_for_user(auth.user_id)
        .await?
        .and_then(|sub| sub.stripe_customer_id)
        .ok_or_else(|| CoreError::NotFound("subscription".to_string()))?;

    let url = state
        .stripe
        .create_portal_session(
            &customer_id,
            &format!("{}/dashboard", state.config.app_base_url),
        )
        .await?;

    Ok(Json(SessionUrlResponse { url }))
}
