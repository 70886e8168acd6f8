//! Postgres implementations of the core storage traits
//!
//! Quota increments and status transitions are single statements so their
//! guarantees hold under concurrent requests: the ledger uses
//! `ON CONFLICT ... DO UPDATE` with an optional count guard, scan writes are
//! conditional on the expected prior status.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use webscan_core::entitlement::{Role, SubscriptionStatus};
use webscan_core::scan::{NewFinding, ScanStatus};
use webscan_core::store::{
    FindingRecord, QuotaStore, ScanRecord, ScanStatusCounts, ScanStore, SubscriptionRecord,
    SubscriptionStore, UserRecord, UserStore,
};
use webscan_core::{CoreError, CoreResult};

use super::schema::{DailyScanLimitRow, ScanResultRow, ScanRow, SubscriptionRow, UserRow};

fn db_err(err: sqlx::Error) -> CoreError {
    CoreError::Storage(err.to_string())
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get(&self, id: Uuid) -> CoreResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(UserRow::into_record).transpose()
    }

    async fn set_role(&self, id: Uuid, role: Role) -> CoreResult<()> {
        sqlx::query("UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanStore for PgScanStore {
    async fn create(&self, user_id: Uuid, domain: &str) -> CoreResult<ScanRecord> {
        let row = sqlx::query_as::<_, ScanRow>(
            r#"
            INSERT INTO scans (id, user_id, domain, status, created_at)
            VALUES ($1, $2, $3, 'pending', NOW())
            RETURNING id, user_id, domain, status, created_at, completed_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(domain)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.into_record()
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<ScanRecord>> {
        let row = sqlx::query_as::<_, ScanRow>(
            r#"
            SELECT id, user_id, domain, status, created_at, completed_at
            FROM scans WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(ScanRow::into_record).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> CoreResult<Vec<ScanRecord>> {
        let rows = sqlx::query_as::<_, ScanRow>(
            r#"
            SELECT id, user_id, domain, status, created_at, completed_at
            FROM scans
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(ScanRow::into_record).collect()
    }

    async fn transition(&self, id: Uuid, from: ScanStatus, to: ScanStatus) -> CoreResult<bool> {
        let result = sqlx::query("UPDATE scans SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn finalize(
        &self,
        id: Uuid,
        to: ScanStatus,
        completed_at: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scans SET status = $2, completed_at = $3
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_findings(&self, scan_id: Uuid, findings: &[NewFinding]) -> CoreResult<()> {
        for finding in findings {
            sqlx::query(
                r#"
                INSERT INTO scan_results
                    (id, scan_id, vulnerability_type, severity, description,
                     recommendation, affected_url, evidence, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(scan_id)
            .bind(&finding.vulnerability_type)
            .bind(finding.severity.as_str())
            .bind(&finding.description)
            .bind(&finding.recommendation)
            .bind(&finding.affected_url)
            .bind(&finding.evidence)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn findings(&self, scan_id: Uuid) -> CoreResult<Vec<FindingRecord>> {
        let rows = sqlx::query_as::<_, ScanResultRow>(
            r#"
            SELECT id, scan_id, vulnerability_type, severity, description,
                   recommendation, affected_url, evidence, created_at
            FROM scan_results
            WHERE scan_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(scan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(ScanResultRow::into_record).collect()
    }

    async fn status_counts(&self) -> CoreResult<ScanStatusCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM scans GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut counts = ScanStatusCounts::default();
        for (status, count) in rows {
            match ScanStatus::parse(&status) {
                Some(ScanStatus::Pending) => counts.pending = count,
                Some(ScanStatus::Running) => counts.running = count,
                Some(ScanStatus::Completed) => counts.completed = count,
                Some(ScanStatus::Failed) => counts.failed = count,
                None => return Err(CoreError::Storage(format!("unknown scan status {status:?}"))),
            }
        }
        Ok(counts)
    }

    async fn total_findings(&self) -> CoreResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scan_results")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }
}

pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    async fn count(&self, user_id: Uuid, date: NaiveDate) -> CoreResult<i64> {
        let row = sqlx::query_as::<_, DailyScanLimitRow>(
            r#"
            SELECT user_id, date, scan_count
            FROM daily_scan_limits
            WHERE user_id = $1 AND date = $2
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| r.scan_count).unwrap_or(0))
    }

    async fn increment(&self, user_id: Uuid, date: NaiveDate) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_scan_limits (id, user_id, date, scan_count, created_at, updated_at)
            VALUES ($1, $2, $3, 1, NOW(), NOW())
            ON CONFLICT (user_id, date) DO UPDATE
            SET scan_count = daily_scan_limits.scan_count + 1, updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(date)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn try_consume(&self, user_id: Uuid, date: NaiveDate, limit: i64) -> CoreResult<bool> {
        // the guarded upsert consumes nothing once the count reaches the limit
        let result = sqlx::query(
            r#"
            INSERT INTO daily_scan_limits (id, user_id, date, scan_count, created_at, updated_at)
            VALUES ($1, $2, $3, 1, NOW(), NOW())
            ON CONFLICT (user_id, date) DO UPDATE
            SET scan_count = daily_scan_limits.scan_count + 1, updated_at = NOW()
            WHERE daily_scan_limits.scan_count < $4
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(date)
        .bind(limit)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, stripe_customer_id, stripe_subscription_id, \
     stripe_price_id, status, current_period_start, current_period_end, created_at";

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn latest_for_user(&self, user_id: Uuid) -> CoreResult<Option<SubscriptionRecord>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(SubscriptionRow::into_record).transpose()
    }

    async fn upsert_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> CoreResult<SubscriptionRecord> {
        let updated = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            UPDATE subscriptions
            SET stripe_customer_id = $2, updated_at = NOW()
            WHERE id = (
                SELECT id FROM subscriptions
                WHERE user_id = $1
                ORDER BY created_at DESC
                LIMIT 1
            )
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(row) = updated {
            return row.into_record();
        }

        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"
            INSERT INTO subscriptions (id, user_id, stripe_customer_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, 'incomplete', NOW(), NOW())
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.into_record()
    }

    async fn attach_provider_subscription(
        &self,
        user_id: Uuid,
        subscription_id: &str,
        price_id: Option<&str>,
        status: SubscriptionStatus,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET stripe_subscription_id = $2, stripe_price_id = $3, status = $4,
                current_period_start = $5, current_period_end = $6, updated_at = NOW()
            WHERE id = (
                SELECT id FROM subscriptions
                WHERE user_id = $1
                ORDER BY created_at DESC
                LIMIT 1
            )
            "#,
        )
        .bind(user_id)
        .bind(subscription_id)
        .bind(price_id)
        .bind(status.as_str())
        .bind(period_start)
        .bind(period_end)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // checkout webhooks can arrive before the local row exists
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, user_id, stripe_subscription_id, stripe_price_id, status,
                 current_period_start, current_period_end, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(subscription_id)
        .bind(price_id)
        .bind(status.as_str())
        .bind(period_start)
        .bind(period_end)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn refresh_by_provider_id(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $2, current_period_start = $3, current_period_end = $4,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(status.as_str())
        .bind(period_start)
        .bind(period_end)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_canceled(&self, subscription_id: &str) -> CoreResult<Option<Uuid>> {
        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING user_id
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(user_id)
    }
}
