//! Database row types

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use webscan_core::entitlement::{Role, SubscriptionStatus};
use webscan_core::scan::{ScanStatus, Severity};
use webscan_core::store::{FindingRecord, ScanRecord, SubscriptionRecord, UserRecord};
use webscan_core::{CoreError, CoreResult};

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn into_record(self) -> CoreResult<UserRecord> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| CoreError::Storage(format!("unknown role {:?}", self.role)))?;
        Ok(UserRecord {
            id: self.id,
            email: self.email,
            name: self.name,
            role,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ScanRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub domain: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanRow {
    pub fn into_record(self) -> CoreResult<ScanRecord> {
        let status = ScanStatus::parse(&self.status)
            .ok_or_else(|| CoreError::Storage(format!("unknown scan status {:?}", self.status)))?;
        Ok(ScanRecord {
            id: self.id,
            user_id: self.user_id,
            domain: self.domain,
            status,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ScanResultRow {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub vulnerability_type: String,
    pub severity: String,
    pub description: String,
    pub recommendation: Option<String>,
    pub affected_url: Option<String>,
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScanResultRow {
    pub fn into_record(self) -> CoreResult<FindingRecord> {
        let severity = Severity::parse(&self.severity)
            .ok_or_else(|| CoreError::Storage(format!("unknown severity {:?}", self.severity)))?;
        Ok(FindingRecord {
            id: self.id,
            scan_id: self.scan_id,
            vulnerability_type: self.vulnerability_type,
            severity,
            description: self.description,
            recommendation: self.recommendation,
            affected_url: self.affected_url,
            evidence: self.evidence,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DailyScanLimitRow {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub scan_count: i64,
}

#[derive(Debug, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionRow {
    pub fn into_record(self) -> CoreResult<SubscriptionRecord> {
        let status = SubscriptionStatus::parse(&self.status).ok_or_else(|| {
            CoreError::Storage(format!("unknown subscription status {:?}", self.status))
        })?;
        Ok(SubscriptionRecord {
            id: self.id,
            user_id: self.user_id,
            stripe_customer_id: self.stripe_customer_id,
            stripe_subscription_id: self.stripe_subscription_id,
            stripe_price_id: self.stripe_price_id,
            status,
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            created_at: self.created_at,
        })
    }
}
