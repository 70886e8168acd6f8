//! Scan result callback route
//!
//! Server-to-server endpoint the scanning backend posts terminal results to.
//! Failures return non-2xx so the backend's redelivery can retry; a replayed
//! callback is acknowledged without effect.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use webscan_core::scan::CallbackPayload;
use webscan_core::{CoreError, IngestOutcome};

use crate::error::ApiError;
use crate::AppState;

#[derive(Serialize)]
pub struct CallbackResponse {
    pub message: String,
    pub applied: bool,
}

pub async fn scan_callback(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<CallbackResponse>, ApiError> {
    // decode by hand so a bad status or finding surfaces as invalid_payload
    let payload: CallbackPayload = serde_json::from_value(payload)
        .map_err(|e| CoreError::InvalidPayload(format!("malformed callback: {e}")))?;

    let outcome = state.scans.ingest(payload).await?;
    Ok(Json(CallbackResponse {
        message: "Callback processed successfully".to_string(),
        applied: outcome == IngestOutcome::Applied,
    }))
}
