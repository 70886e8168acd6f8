//! Account routes
//!
//! Read-only user, entitlement and quota queries consumed by the dashboard.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use webscan_core::entitlement::{Admission, Role};
use webscan_core::CoreError;
use webscan_core::UsageSummary;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

#[derive(Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: Role,
    pub is_pro: bool,
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<MeResponse>, ApiError> {
    let user = state
        .users
        .get(auth.user_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("user".to_string()))?;
    let entitlement = state.scans.entitlement(auth.user_id).await?;

    Ok(Json(MeResponse {
        id: user.id,
        email: user.email,
        name: user.name,
        role: entitlement.role,
        is_pro: entitlement.is_pro,
    }))
}

#[derive(Serialize)]
pub struct UsageResponse {
    #[serde(flatten)]
    pub usage: UsageSummary,
    pub admission: Admission,
}

pub async fn usage(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<UsageResponse>, ApiError> {
    let usage = state.scans.usage(auth.user_id).await?;
    let admission = state.scans.can_scan(auth.user_id).await?;
    Ok(Json(UsageResponse { usage, admission }))
}
