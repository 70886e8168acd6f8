//! Outbound hand-off to the scanning backend

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::CoreResult;

/// Body posted to the backend's `/scan` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRequest {
    pub scan_id: Uuid,
    pub domain: String,
    pub callback_url: String,
}

/// Hands a scan job to the external scanning engine. Any non-success
/// outcome, transport error or timeout included, surfaces as
/// `CoreError::BackendUnavailable`.
#[async_trait]
pub trait ScanDispatcher: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest) -> CoreResult<()>;
}
