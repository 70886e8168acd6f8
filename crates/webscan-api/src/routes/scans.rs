//! Scan management routes

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use webscan_core::scan::{ScanStatus, Severity};
use webscan_core::store::{FindingRecord, ScanRecord};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

const HISTORY_LIMIT: i64 = 50;

#[derive(Deserialize)]
pub struct CreateScanRequest {
    pub domain: String,
}

#[derive(Serialize)]
pub struct ScanResponse {
    pub id: Uuid,
    pub domain: String,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ScanRecord> for ScanResponse {
    fn from(scan: ScanRecord) -> Self {
        ScanResponse {
            id: scan.id,
            domain: scan.domain,
            status: scan.status,
            created_at: scan.created_at,
            completed_at: scan.completed_at,
        }
    }
}

#[derive(Serialize)]
pub struct ResultsSummary {
    pub total_vulnerabilities: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
}

impl ResultsSummary {
    fn from_findings(findings: &[FindingRecord]) -> Self {
        let count = |severity: Severity| {
            findings.iter().filter(|f| f.severity == severity).count()
        };
        ResultsSummary {
            total_vulnerabilities: findings.len(),
            critical_count: count(Severity::Critical),
            high_count: count(Severity::High),
            medium_count: count(Severity::Medium),
            low_count: count(Severity::Low),
        }
    }
}

#[derive(Serialize)]
pub struct ScanListEntry {
    #[serde(flatten)]
    pub scan: ScanResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_summary: Option<ResultsSummary>,
}

#[derive(Serialize)]
pub struct FindingResponse {
    pub id: Uuid,
    pub vulnerability_type: String,
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl From<FindingRecord> for FindingResponse {
    fn from(finding: FindingRecord) -> Self {
        FindingResponse {
            id: finding.id,
            vulnerability_type: finding.vulnerability_type,
            severity: finding.severity,
            description: finding.description,
            recommendation: finding.recommendation,
            affected_url: finding.affected_url,
            evidence: finding.evidence,
        }
    }
}

pub async fn create_scan(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<CreateScanRequest>,
) -> Result<(StatusCode, Json<ScanResponse>), ApiError> {
    let scan = state.scans.start_scan(user.user_id, &payload.domain).await?;
    Ok((StatusCode::CREATED, Json(scan.into())))
}

pub async fn list_scans(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<ScanListEntry>>, ApiError> {
    let scans = state.scans.list_scans(user.user_id, HISTORY_LIMIT).await?;

    let mut entries = Vec::with_capacity(scans.len());
    for scan in scans {
        let results_summary = if scan.status == ScanStatus::Completed {
            let findings = state.scans.findings(user.user_id, scan.id).await?;
            Some(ResultsSummary::from_findings(&findings))
        } else {
            None
        };
        entries.push(ScanListEntry {
            scan: scan.into(),
            results_summary,
        });
    }

    Ok(Json(entries))
}

pub async fn get_scan(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ScanResponse>, ApiError> {
    let scan = state.scans.get_scan(user.user_id, id).await?;
    Ok(Json(scan.into()))
}

pub async fn get_results(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<FindingResponse>>, ApiError> {
    let findings = state.scans.findings(user.user_id, id).await?;
    Ok(Json(findings.into_iter().map(Into::into).collect()))
}
