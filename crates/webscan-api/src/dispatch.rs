//! HTTP dispatcher for the scanning backend

use std::time::Duration;

use async_trait::async_trait;
use webscan_core::dispatch::{DispatchRequest, ScanDispatcher};
use webscan_core::{CoreError, CoreResult};

pub struct HttpScanDispatcher {
    client: reqwest::Client,
    backend_url: String,
}

impl HttpScanDispatcher {
    pub fn new(backend_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self {
            client,
            backend_url,
        }
    }
}

#[async_trait]
impl ScanDispatcher for HttpScanDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> CoreResult<()> {
        let url = format!("{}/scan", self.backend_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::BackendUnavailable(format!(
                "backend returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
