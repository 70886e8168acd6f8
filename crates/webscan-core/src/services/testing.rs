//! In-memory store fakes for service tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::billing::{BillingProvider, ProviderSubscription};
use crate::dispatch::{DispatchRequest, ScanDispatcher};
use crate::entitlement::{Role, SubscriptionStatus};
use crate::scan::{NewFinding, ScanStatus};
use crate::store::{
    FindingRecord, QuotaStore, ScanRecord, ScanStatusCounts, ScanStore, SubscriptionRecord,
    SubscriptionStore, UserRecord, UserStore,
};
use crate::{CoreError, CoreResult};

#[derive(Default)]
pub struct MemUsers {
    users: Mutex<HashMap<Uuid, UserRecord>>,
}

impl MemUsers {
    pub fn with_user(role: Role) -> (Self, Uuid) {
        let store = Self::default();
        let id = store.insert(role);
        (store, id)
    }

    pub fn insert(&self, role: Role) -> Uuid {
        let id = Uuid::new_v4();
        self.users.lock().unwrap().insert(
            id,
            UserRecord {
                id,
                email: format!("{id}@example.test"),
                name: None,
                role,
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn role_of(&self, id: Uuid) -> Role {
        self.users.lock().unwrap()[&id].role
    }
}

#[async_trait]
impl UserStore for MemUsers {
    async fn get(&self, id: Uuid) -> CoreResult<Option<UserRecord>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> CoreResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound("user".into()))?;
        user.role = role;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemScans {
    scans: Mutex<HashMap<Uuid, ScanRecord>>,
    findings: Mutex<Vec<FindingRecord>>,
}

impl MemScans {
    pub fn scan_count(&self) -> usize {
        self.scans.lock().unwrap().len()
    }

    pub fn status_of(&self, id: Uuid) -> ScanStatus {
        self.scans.lock().unwrap()[&id].status
    }

    pub fn finding_count(&self, scan_id: Uuid) -> usize {
        self.findings
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.scan_id == scan_id)
            .count()
    }
}

#[async_trait]
impl ScanStore for MemScans {
    async fn create(&self, user_id: Uuid, domain: &str) -> CoreResult<ScanRecord> {
        let record = ScanRecord {
            id: Uuid::new_v4(),
            user_id,
            domain: domain.to_string(),
            status: ScanStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.scans
            .lock()
            .unwrap()
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<ScanRecord>> {
        Ok(self.scans.lock().unwrap().get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> CoreResult<Vec<ScanRecord>> {
        let mut scans: Vec<ScanRecord> = self
            .scans
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        scans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        scans.truncate(limit as usize);
        Ok(scans)
    }

    async fn transition(&self, id: Uuid, from: ScanStatus, to: ScanStatus) -> CoreResult<bool> {
        let mut scans = self.scans.lock().unwrap();
        match scans.get_mut(&id) {
            Some(scan) if scan.status == from => {
                scan.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize(
        &self,
        id: Uuid,
        to: ScanStatus,
        completed_at: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let mut scans = self.scans.lock().unwrap();
        match scans.get_mut(&id) {
            Some(scan) if scan.status == ScanStatus::Running => {
                scan.status = to;
                scan.completed_at = Some(completed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_findings(&self, scan_id: Uuid, findings: &[NewFinding]) -> CoreResult<()> {
        let mut all = self.findings.lock().unwrap();
        for finding in findings {
            all.push(FindingRecord {
                id: Uuid::new_v4(),
                scan_id,
                vulnerability_type: finding.vulnerability_type.clone(),
                severity: finding.severity,
                description: finding.description.clone(),
                recommendation: finding.recommendation.clone(),
                affected_url: finding.affected_url.clone(),
                evidence: finding.evidence.clone(),
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn findings(&self, scan_id: Uuid) -> CoreResult<Vec<FindingRecord>> {
        Ok(self
            .findings
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.scan_id == scan_id)
            .cloned()
            .collect())
    }

    async fn status_counts(&self) -> CoreResult<ScanStatusCounts> {
        let mut counts = ScanStatusCounts::default();
        for scan in self.scans.lock().unwrap().values() {
            match scan.status {
                ScanStatus::Pending => counts.pending += 1,
                ScanStatus::Running => counts.running += 1,
                ScanStatus::Completed => counts.completed += 1,
                ScanStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn total_findings(&self) -> CoreResult<i64> {
        Ok(self.findings.lock().unwrap().len() as i64)
    }
}

#[derive(Default)]
pub struct MemQuota {
    counts: Mutex<HashMap<(Uuid, NaiveDate), i64>>,
}

impl MemQuota {
    pub fn count_sync(&self, user_id: Uuid, date: NaiveDate) -> i64 {
        *self
            .counts
            .lock()
            .unwrap()
            .get(&(user_id, date))
            .unwrap_or(&0)
    }
}

#[async_trait]
impl QuotaStore for MemQuota {
    async fn count(&self, user_id: Uuid, date: NaiveDate) -> CoreResult<i64> {
        Ok(self.count_sync(user_id, date))
    }

    async fn increment(&self, user_id: Uuid, date: NaiveDate) -> CoreResult<()> {
        *self
            .counts
            .lock()
            .unwrap()
            .entry((user_id, date))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn try_consume(&self, user_id: Uuid, date: NaiveDate, limit: i64) -> CoreResult<bool> {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry((user_id, date)).or_insert(0);
        if *count < limit {
            *count += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Quota store that fails the test if any method is touched.
#[derive(Default)]
pub struct UntouchableQuota;

#[async_trait]
impl QuotaStore for UntouchableQuota {
    async fn count(&self, _user_id: Uuid, _date: NaiveDate) -> CoreResult<i64> {
        panic!("quota ledger must not be consulted");
    }

    async fn increment(&self, _user_id: Uuid, _date: NaiveDate) -> CoreResult<()> {
        panic!("quota ledger must not be consulted");
    }

    async fn try_consume(
        &self,
        _user_id: Uuid,
        _date: NaiveDate,
        _limit: i64,
    ) -> CoreResult<bool> {
        panic!("quota ledger must not be consulted");
    }
}

#[derive(Default)]
pub struct MemSubscriptions {
    subs: Mutex<Vec<SubscriptionRecord>>,
}

impl MemSubscriptions {
    pub fn insert(&self, user_id: Uuid, status: SubscriptionStatus) -> Uuid {
        let id = Uuid::new_v4();
        self.subs.lock().unwrap().push(SubscriptionRecord {
            id,
            user_id,
            stripe_customer_id: Some(format!("cus_{id}")),
            stripe_subscription_id: None,
            stripe_price_id: None,
            status,
            current_period_start: None,
            current_period_end: None,
            created_at: Utc::now(),
        });
        id
    }

    pub fn status_for_user(&self, user_id: Uuid) -> Option<SubscriptionStatus> {
        self.subs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.user_id == user_id)
            .map(|s| s.status)
    }
}

#[async_trait]
impl SubscriptionStore for MemSubscriptions {
    async fn latest_for_user(&self, user_id: Uuid) -> CoreResult<Option<SubscriptionRecord>> {
        // insertion order doubles as creation order
        Ok(self
            .subs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.user_id == user_id)
            .cloned())
    }

    async fn upsert_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> CoreResult<SubscriptionRecord> {
        let mut subs = self.subs.lock().unwrap();
        if let Some(existing) = subs.iter_mut().rev().find(|s| s.user_id == user_id) {
            existing.stripe_customer_id = Some(customer_id.to_string());
            return Ok(existing.clone());
        }
        let record = SubscriptionRecord {
            id: Uuid::new_v4(),
            user_id,
            stripe_customer_id: Some(customer_id.to_string()),
            stripe_subscription_id: None,
            stripe_price_id: None,
            status: SubscriptionStatus::Incomplete,
            current_period_start: None,
            current_period_end: None,
            created_at: Utc::now(),
        };
        subs.push(record.clone());
        Ok(record)
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
        let mut subs = self.subs.lock().unwrap();
        if let Some(existing) = subs.iter_mut().rev().find(|s| s.user_id == user_id) {
            existing.stripe_subscription_id = Some(subscription_id.to_string());
            existing.stripe_price_id = price_id.map(str::to_string);
            existing.status = status;
            existing.current_period_start = period_start;
            existing.current_period_end = period_end;
        } else {
            subs.push(SubscriptionRecord {
                id: Uuid::new_v4(),
                user_id,
                stripe_customer_id: None,
                stripe_subscription_id: Some(subscription_id.to_string()),
                stripe_price_id: price_id.map(str::to_string),
                status,
                current_period_start: period_start,
                current_period_end: period_end,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn refresh_by_provider_id(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> CoreResult<bool> {
        let mut subs = self.subs.lock().unwrap();
        match subs
            .iter_mut()
            .find(|s| s.stripe_subscription_id.as_deref() == Some(subscription_id))
        {
            Some(sub) => {
                sub.status = status;
                sub.current_period_start = period_start;
                sub.current_period_end = period_end;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_canceled(&self, subscription_id: &str) -> CoreResult<Option<Uuid>> {
        let mut subs = self.subs.lock().unwrap();
        match subs
            .iter_mut()
            .find(|s| s.stripe_subscription_id.as_deref() == Some(subscription_id))
        {
            Some(sub) => {
                sub.status = SubscriptionStatus::Canceled;
                Ok(Some(sub.user_id))
            }
            None => Ok(None),
        }
    }
}

/// Dispatcher that records requests and optionally fails every call.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub fail: bool,
    calls: Mutex<Vec<DispatchRequest>>,
}

impl RecordingDispatcher {
    pub fn failing() -> Self {
        RecordingDispatcher {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<DispatchRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScanDispatcher for RecordingDispatcher {
    async fn dispatch(&self, request: &DispatchRequest) -> CoreResult<()> {
        self.calls.lock().unwrap().push(request.clone());
        if self.fail {
            Err(CoreError::BackendUnavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

/// Billing provider serving canned subscription objects.
#[derive(Default)]
pub struct FakeProvider {
    subs: Mutex<HashMap<String, ProviderSubscription>>,
}

impl FakeProvider {
    pub fn insert(&self, sub: ProviderSubscription) {
        self.subs.lock().unwrap().insert(sub.id.clone(), sub);
    }
}

#[async_trait]
impl BillingProvider for FakeProvider {
    async fn fetch_subscription(&self, subscription_id: &str) -> CoreResult<ProviderSubscription> {
        self.subs
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound("subscription".into()))
    }
}
