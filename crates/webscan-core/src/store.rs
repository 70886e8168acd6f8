//! Storage contracts
//!
//! Object-safe async traits over the rows the engine reads and writes. The
//! API crate implements them on Postgres; tests use in-memory fakes. Methods
//! that guard a state transition return whether the write applied so callers
//! can treat redelivery as a no-op instead of an error.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::entitlement::{Role, SubscriptionStatus};
use crate::scan::{NewFinding, ScanStatus, Severity};
use crate::CoreResult;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub domain: String,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FindingRecord {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub vulnerability_type: String,
    pub severity: Severity,
    pub description: String,
    pub recommendation: Option<String>,
    pub affected_url: Option<String>,
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Scan counts per status, for the admin stats surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanStatusCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: Uuid) -> CoreResult<Option<UserRecord>>;

    /// Role writes come exclusively from the billing event processor.
    async fn set_role(&self, id: Uuid, role: Role) -> CoreResult<()>;
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn create(&self, user_id: Uuid, domain: &str) -> CoreResult<ScanRecord>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<ScanRecord>>;

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> CoreResult<Vec<ScanRecord>>;

    /// Conditional `from -> to`; false when the row was not in `from`.
    async fn transition(&self, id: Uuid, from: ScanStatus, to: ScanStatus) -> CoreResult<bool>;

    /// Conditional terminal transition out of `running`, stamping
    /// `completed_at`. False when the scan is not currently running.
    async fn finalize(
        &self,
        id: Uuid,
        to: ScanStatus,
        completed_at: DateTime<Utc>,
    ) -> CoreResult<bool>;

    async fn insert_findings(&self, scan_id: Uuid, findings: &[NewFinding]) -> CoreResult<()>;

    async fn findings(&self, scan_id: Uuid) -> CoreResult<Vec<FindingRecord>>;

    async fn status_counts(&self) -> CoreResult<ScanStatusCounts>;

    async fn total_findings(&self) -> CoreResult<i64>;
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Today's count for the key; absence reads as zero.
    async fn count(&self, user_id: Uuid, date: NaiveDate) -> CoreResult<i64>;

    /// Atomic upsert: create at 1 or bump by 1. Safe under concurrent calls
    /// for the same key.
    async fn increment(&self, user_id: Uuid, date: NaiveDate) -> CoreResult<()>;

    /// Atomic increment-if-below: consumes one unit and returns true only
    /// when the current count is under `limit`.
    async fn try_consume(&self, user_id: Uuid, date: NaiveDate, limit: i64) -> CoreResult<bool>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Most recently created subscription row for the user, if any.
    async fn latest_for_user(&self, user_id: Uuid) -> CoreResult<Option<SubscriptionRecord>>;

    /// Create a row for the user or attach the billing customer id to the
    /// existing one. Used when checkout is first initiated.
    async fn upsert_customer(&self, user_id: Uuid, customer_id: &str) -> CoreResult<SubscriptionRecord>;

    /// Write provider subscription details onto the user's row after a
    /// completed checkout.
    async fn attach_provider_subscription(
        &self,
        user_id: Uuid,
        subscription_id: &str,
        price_id: Option<&str>,
        status: SubscriptionStatus,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> CoreResult<()>;

    /// Refresh status/period on the row matching the provider subscription
    /// id. False when no row matches (out-of-order delivery).
    async fn refresh_by_provider_id(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> CoreResult<bool>;

    /// Mark the matching row canceled, returning the owning user id when a
    /// row matched.
    async fn mark_canceled(&self, subscription_id: &str) -> CoreResult<Option<Uuid>>;
}
