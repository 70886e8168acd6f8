//! Admin routes

use axum::extract::State;
use axum::Json;
use std::sync::Arc;

use webscan_core::entitlement::Role;
use webscan_core::ScanStats;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ScanStats>, ApiError> {
    let entitlement = state.scans.entitlement(auth.user_id).await?;
    if entitlement.role != Role::Admin {
        return Err(ApiError::Unauthorized);
    }

    let stats = state.scans.stats().await?;
    Ok(Json(stats))
}
