//! Scan lifecycle service
//!
//! Admission, orchestration and result ingestion over the storage and
//! dispatch seams. Free-tier metering uses the atomic conditional consume so
//! two concurrent requests cannot both pass a nearly-exhausted quota; the
//! read-only admission query keeps the plain count read for the UI.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{DispatchRequest, ScanDispatcher};
use crate::domain::validate_domain;
use crate::entitlement::{
    admit_metered, quota_exceeded_reason, Admission, Entitlement, SubscriptionStatus,
    DAILY_FREE_LIMIT,
};
use crate::scan::{CallbackPayload, CallbackStatus, NewFinding, ScanStatus};
use crate::store::{
    FindingRecord, QuotaStore, ScanRecord, ScanStatusCounts, ScanStore, SubscriptionStore,
    UserStore,
};
use crate::{CoreError, CoreResult};

/// What a callback application did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The scan was finalized by this call.
    Applied,
    /// The scan was not in `running`; redelivered or out-of-order callback,
    /// accepted without effect.
    AlreadyFinal,
}

/// Daily usage for the account surface.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub used_today: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<i64>,
    pub entitlement: Entitlement,
}

/// Aggregate counts for the admin surface.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScanStats {
    pub total_scans: i64,
    pub pending_scans: i64,
    pub completed_scans: i64,
    pub failed_scans: i64,
    pub total_findings: i64,
}

pub struct ScanService {
    users: Arc<dyn UserStore>,
    scans: Arc<dyn ScanStore>,
    quota: Arc<dyn QuotaStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    dispatcher: Arc<dyn ScanDispatcher>,
    callback_url: String,
}

impl ScanService {
    pub fn new(
        users: Arc<dyn UserStore>,
        scans: Arc<dyn ScanStore>,
        quota: Arc<dyn QuotaStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        dispatcher: Arc<dyn ScanDispatcher>,
        callback_url: String,
    ) -> Self {
        ScanService {
            users,
            scans,
            quota,
            subscriptions,
            dispatcher,
            callback_url,
        }
    }

    /// Effective access level: stored role plus pro-ness derived from the
    /// latest subscription row.
    pub async fn entitlement(&self, user_id: Uuid) -> CoreResult<Entitlement> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("user".into()))?;
        let latest = self.subscriptions.latest_for_user(user_id).await?;
        let is_pro = latest
            .map(|sub| sub.status == SubscriptionStatus::Active)
            .unwrap_or(false);
        Ok(Entitlement {
            role: user.role,
            is_pro,
        })
    }

    /// Read-only admission check for the presentation layer. Pro and admin
    /// users are admitted without touching the quota ledger.
    pub async fn can_scan(&self, user_id: Uuid) -> CoreResult<Admission> {
        let entitlement = self.entitlement(user_id).await?;
        if entitlement.is_unmetered() {
            return Ok(Admission::allowed());
        }
        let count = self.quota.count(user_id, Utc::now().date_naive()).await?;
        Ok(admit_metered(count))
    }

    /// Validate, admit, create and dispatch a scan.
    ///
    /// Free-tier quota is consumed before dispatch, so a failed dispatch
    /// still costs a quota unit; the scan row is kept as `failed` for
    /// history and there is no automatic retry.
    pub async fn start_scan(&self, user_id: Uuid, domain: &str) -> CoreResult<ScanRecord> {
        let domain = validate_domain(domain)?;

        let entitlement = self.entitlement(user_id).await?;
        if !entitlement.is_unmetered() {
            let today = Utc::now().date_naive();
            let consumed = self
                .quota
                .try_consume(user_id, today, DAILY_FREE_LIMIT)
                .await?;
            if !consumed {
                return Err(CoreError::QuotaExceeded(quota_exceeded_reason()));
            }
        }

        let scan = self.scans.create(user_id, &domain).await?;
        let request = DispatchRequest {
            scan_id: scan.id,
            domain: domain.clone(),
            callback_url: self.callback_url.clone(),
        };

        match self.dispatcher.dispatch(&request).await {
            Ok(()) => {
                self.scans
                    .transition(scan.id, ScanStatus::Pending, ScanStatus::Running)
                    .await?;
                info!(scan_id = %scan.id, %domain, "scan dispatched");
                Ok(ScanRecord {
                    status: ScanStatus::Running,
                    ..scan
                })
            }
            Err(err) => {
                self.scans
                    .transition(scan.id, ScanStatus::Pending, ScanStatus::Failed)
                    .await?;
                warn!(scan_id = %scan.id, %domain, error = %err, "scan dispatch failed");
                Err(err)
            }
        }
    }

    /// Apply a backend callback. Idempotent: only a scan currently in
    /// `running` is finalized, everything else is an acknowledged no-op so
    /// at-least-once delivery cannot duplicate findings.
    pub async fn ingest(&self, payload: CallbackPayload) -> CoreResult<IngestOutcome> {
        let scan = self
            .scans
            .get(payload.scan_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("scan".into()))?;

        for finding in &payload.results {
            validate_finding(finding)?;
        }

        let to = match payload.status {
            CallbackStatus::Completed => ScanStatus::Completed,
            CallbackStatus::Failed => ScanStatus::Failed,
        };

        let applied = self.scans.finalize(payload.scan_id, to, Utc::now()).await?;
        if !applied {
            debug!(
                scan_id = %payload.scan_id,
                status = %scan.status,
                "callback for scan not in running state, ignoring"
            );
            return Ok(IngestOutcome::AlreadyFinal);
        }

        match payload.status {
            CallbackStatus::Completed => {
                self.scans
                    .insert_findings(payload.scan_id, &payload.results)
                    .await?;
                info!(
                    scan_id = %payload.scan_id,
                    domain = %scan.domain,
                    findings = payload.results.len(),
                    "scan completed"
                );
            }
            CallbackStatus::Failed => {
                warn!(
                    scan_id = %payload.scan_id,
                    domain = %scan.domain,
                    error = payload.error.as_deref().unwrap_or("unknown"),
                    "scan failed on backend"
                );
            }
        }

        Ok(IngestOutcome::Applied)
    }

    pub async fn get_scan(&self, user_id: Uuid, scan_id: Uuid) -> CoreResult<ScanRecord> {
        match self.scans.get(scan_id).await? {
            Some(scan) if scan.user_id == user_id => Ok(scan),
            // hide other users' scans
            _ => Err(CoreError::NotFound("scan".into())),
        }
    }

    pub async fn list_scans(&self, user_id: Uuid, limit: i64) -> CoreResult<Vec<ScanRecord>> {
        self.scans.list_for_user(user_id, limit).await
    }

    pub async fn findings(&self, user_id: Uuid, scan_id: Uuid) -> CoreResult<Vec<FindingRecord>> {
        self.get_scan(user_id, scan_id).await?;
        self.scans.findings(scan_id).await
    }

    pub async fn usage(&self, user_id: Uuid) -> CoreResult<UsageSummary> {
        let entitlement = self.entitlement(user_id).await?;
        let used_today = self.quota.count(user_id, Utc::now().date_naive()).await?;
        let daily_limit = if entitlement.is_unmetered() {
            None
        } else {
            Some(DAILY_FREE_LIMIT)
        };
        Ok(UsageSummary {
            used_today,
            daily_limit,
            entitlement,
        })
    }

    pub async fn stats(&self) -> CoreResult<ScanStats> {
        let counts: ScanStatusCounts = self.scans.status_counts().await?;
        let total_findings = self.scans.total_findings().await?;
        Ok(ScanStats {
            total_scans: counts.pending + counts.running + counts.completed + counts.failed,
            pending_scans: counts.pending + counts.running,
            completed_scans: counts.completed,
            failed_scans: counts.failed,
            total_findings,
        })
    }
}

fn validate_finding(finding: &NewFinding) -> CoreResult<()> {
    if finding.vulnerability_type.trim().is_empty() {
        return Err(CoreError::InvalidPayload(
            "finding is missing vulnerability type".into(),
        ));
    }
    if finding.description.trim().is_empty() {
        return Err(CoreError::InvalidPayload(
            "finding is missing description".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::Role;
    use crate::scan::Severity;
    use crate::services::testing::*;

    struct Harness {
        users: Arc<MemUsers>,
        scans: Arc<MemScans>,
        quota: Arc<MemQuota>,
        subscriptions: Arc<MemSubscriptions>,
        dispatcher: Arc<RecordingDispatcher>,
        service: ScanService,
        user_id: Uuid,
    }

    fn harness(role: Role) -> Harness {
        harness_with_dispatcher(role, RecordingDispatcher::default())
    }

    fn harness_with_dispatcher(role: Role, dispatcher: RecordingDispatcher) -> Harness {
        let (users, user_id) = MemUsers::with_user(role);
        let users = Arc::new(users);
        let scans = Arc::new(MemScans::default());
        let quota = Arc::new(MemQuota::default());
        let subscriptions = Arc::new(MemSubscriptions::default());
        let dispatcher = Arc::new(dispatcher);
        let service = ScanService::new(
            users.clone(),
            scans.clone(),
            quota.clone(),
            subscriptions.clone(),
            dispatcher.clone(),
            "https://app.example.test/api/scan/callback".into(),
        );
        Harness {
            users,
            scans,
            quota,
            subscriptions,
            dispatcher,
            service,
            user_id,
        }
    }

    fn finding(vuln: &str, severity: Severity) -> NewFinding {
        NewFinding {
            vulnerability_type: vuln.into(),
            severity,
            description: format!("{vuln} detected"),
            recommendation: None,
            affected_url: None,
            evidence: None,
        }
    }

    fn completion(scan_id: Uuid, results: Vec<NewFinding>) -> CallbackPayload {
        CallbackPayload {
            scan_id,
            status: CallbackStatus::Completed,
            results,
            error: None,
        }
    }

    #[tokio::test]
    async fn fourth_scan_of_the_day_is_denied_for_free_user() {
        let h = harness(Role::Free);

        for _ in 0..DAILY_FREE_LIMIT {
            h.service.start_scan(h.user_id, "example.com").await.unwrap();
        }
        assert_eq!(h.scans.scan_count(), 3);

        let denied = h.service.start_scan(h.user_id, "example.com").await;
        assert!(matches!(denied, Err(CoreError::QuotaExceeded(_))));
        // denial leaves no scan row and no extra quota unit behind
        assert_eq!(h.scans.scan_count(), 3);
        assert_eq!(
            h.quota.count_sync(h.user_id, Utc::now().date_naive()),
            DAILY_FREE_LIMIT
        );
    }

    #[tokio::test]
    async fn concurrent_increments_do_not_lose_updates() {
        let quota = Arc::new(MemQuota::default());
        let user_id = Uuid::new_v4();
        let date = Utc::now().date_naive();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let quota = quota.clone();
            handles.push(tokio::spawn(async move {
                quota.increment(user_id, date).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(quota.count_sync(user_id, date), 32);
    }

    #[tokio::test]
    async fn concurrent_consumes_respect_the_limit() {
        let quota = Arc::new(MemQuota::default());
        let user_id = Uuid::new_v4();
        let date = Utc::now().date_naive();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let quota = quota.clone();
            handles.push(tokio::spawn(async move {
                quota.try_consume(user_id, date, DAILY_FREE_LIMIT).await.unwrap()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, DAILY_FREE_LIMIT);
        assert_eq!(quota.count_sync(user_id, date), DAILY_FREE_LIMIT);
    }

    #[tokio::test]
    async fn replayed_completion_callback_is_a_noop() {
        let h = harness(Role::Free);
        let scan = h.service.start_scan(h.user_id, "example.com").await.unwrap();

        let payload = completion(scan.id, vec![finding("xss", Severity::High)]);
        let first = h.service.ingest(payload.clone()).await.unwrap();
        assert_eq!(first, IngestOutcome::Applied);
        assert_eq!(h.scans.finding_count(scan.id), 1);
        assert_eq!(h.scans.status_of(scan.id), ScanStatus::Completed);

        let second = h.service.ingest(payload).await.unwrap();
        assert_eq!(second, IngestOutcome::AlreadyFinal);
        assert_eq!(h.scans.finding_count(scan.id), 1);
        assert_eq!(h.scans.status_of(scan.id), ScanStatus::Completed);
    }

    #[tokio::test]
    async fn failed_dispatch_marks_scan_failed_and_keeps_quota_unit() {
        let h = harness_with_dispatcher(Role::Free, RecordingDispatcher::failing());

        let result = h.service.start_scan(h.user_id, "example.com").await;
        assert!(matches!(result, Err(CoreError::BackendUnavailable(_))));

        assert_eq!(h.scans.scan_count(), 1);
        let scan_id = h.dispatcher.calls()[0].scan_id;
        assert_eq!(h.scans.status_of(scan_id), ScanStatus::Failed);
        // the unit is spent even though nothing was scanned
        assert_eq!(h.quota.count_sync(h.user_id, Utc::now().date_naive()), 1);
    }

    #[tokio::test]
    async fn invalid_domain_is_rejected_before_any_side_effect() {
        let h = harness(Role::Free);

        for bad in ["", "-bad-.com", "http://example.com"] {
            let result = h.service.start_scan(h.user_id, bad).await;
            assert!(matches!(result, Err(CoreError::InvalidDomain)), "{bad:?}");
        }
        assert_eq!(h.scans.scan_count(), 0);
        assert_eq!(h.quota.count_sync(h.user_id, Utc::now().date_naive()), 0);
        assert!(h.dispatcher.calls().is_empty());
    }

    #[tokio::test]
    async fn admin_admission_never_reads_the_ledger() {
        let (users, user_id) = MemUsers::with_user(Role::Admin);
        let scans = Arc::new(MemScans::default());
        let service = ScanService::new(
            Arc::new(users),
            scans.clone(),
            Arc::new(UntouchableQuota),
            Arc::new(MemSubscriptions::default()),
            Arc::new(RecordingDispatcher::default()),
            "https://app.example.test/api/scan/callback".into(),
        );

        let admission = service.can_scan(user_id).await.unwrap();
        assert!(admission.allowed);

        // unlimited starts, still without a single ledger call
        for _ in 0..5 {
            service.start_scan(user_id, "example.com").await.unwrap();
        }
        assert_eq!(scans.scan_count(), 5);
    }

    #[tokio::test]
    async fn active_subscription_makes_free_role_pro_and_unmetered() {
        let h = harness(Role::Free);
        h.subscriptions
            .insert(h.user_id, SubscriptionStatus::Active);

        let entitlement = h.service.entitlement(h.user_id).await.unwrap();
        assert_eq!(entitlement.role, Role::Free);
        assert!(entitlement.is_pro);

        // a pro user is not metered at all
        for _ in 0..(DAILY_FREE_LIMIT + 2) {
            h.service.start_scan(h.user_id, "example.com").await.unwrap();
        }
        assert_eq!(h.quota.count_sync(h.user_id, Utc::now().date_naive()), 0);
    }

    #[tokio::test]
    async fn canceled_subscription_does_not_grant_pro() {
        let h = harness(Role::Free);
        h.subscriptions
            .insert(h.user_id, SubscriptionStatus::Canceled);

        let entitlement = h.service.entitlement(h.user_id).await.unwrap();
        assert!(!entitlement.is_pro);
    }

    #[tokio::test]
    async fn latest_subscription_wins_over_older_rows() {
        let h = harness(Role::Free);
        h.subscriptions.insert(h.user_id, SubscriptionStatus::Active);
        h.subscriptions
            .insert(h.user_id, SubscriptionStatus::Canceled);

        let entitlement = h.service.entitlement(h.user_id).await.unwrap();
        assert!(!entitlement.is_pro);
    }

    #[tokio::test]
    async fn can_scan_denies_free_user_at_limit_with_reason() {
        let h = harness(Role::Free);
        for _ in 0..DAILY_FREE_LIMIT {
            h.quota
                .increment(h.user_id, Utc::now().date_naive())
                .await
                .unwrap();
        }

        let admission = h.service.can_scan(h.user_id).await.unwrap();
        assert!(!admission.allowed);
        assert!(admission.reason.unwrap().contains("Upgrade to Pro"));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let h = harness(Role::Free);
        let result = h.service.start_scan(Uuid::new_v4(), "example.com").await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn callback_for_unknown_scan_is_not_found() {
        let h = harness(Role::Free);
        let result = h
            .service
            .ingest(completion(Uuid::new_v4(), Vec::new()))
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn callback_with_blank_finding_fields_is_invalid() {
        let h = harness(Role::Free);
        let scan = h.service.start_scan(h.user_id, "example.com").await.unwrap();

        let mut bad = finding("sqli", Severity::Critical);
        bad.description = "  ".into();
        let result = h.service.ingest(completion(scan.id, vec![bad])).await;
        assert!(matches!(result, Err(CoreError::InvalidPayload(_))));
        // rejected payloads leave the scan running for a valid retry
        assert_eq!(h.scans.status_of(scan.id), ScanStatus::Running);
    }

    #[tokio::test]
    async fn completed_callback_with_no_findings_is_a_clean_scan() {
        let h = harness(Role::Free);
        let scan = h.service.start_scan(h.user_id, "example.com").await.unwrap();

        let outcome = h
            .service
            .ingest(completion(scan.id, Vec::new()))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Applied);
        assert_eq!(h.scans.status_of(scan.id), ScanStatus::Completed);
        assert_eq!(h.scans.finding_count(scan.id), 0);
    }

    #[tokio::test]
    async fn failed_callback_stores_no_findings() {
        let h = harness(Role::Free);
        let scan = h.service.start_scan(h.user_id, "example.com").await.unwrap();

        let payload = CallbackPayload {
            scan_id: scan.id,
            status: CallbackStatus::Failed,
            results: vec![finding("xss", Severity::Low)],
            error: Some("crawler crashed".into()),
        };
        let outcome = h.service.ingest(payload).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Applied);
        assert_eq!(h.scans.status_of(scan.id), ScanStatus::Failed);
        assert_eq!(h.scans.finding_count(scan.id), 0);
    }

    #[tokio::test]
    async fn callback_racing_ahead_of_dispatch_ack_is_ignored() {
        let h = harness(Role::Free);
        let scan = h.scans.create(h.user_id, "example.com").await.unwrap();
        assert_eq!(h.scans.status_of(scan.id), ScanStatus::Pending);

        let outcome = h
            .service
            .ingest(completion(scan.id, vec![finding("xss", Severity::High)]))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::AlreadyFinal);
        assert_eq!(h.scans.status_of(scan.id), ScanStatus::Pending);
        assert_eq!(h.scans.finding_count(scan.id), 0);
    }

    #[tokio::test]
    async fn scans_are_hidden_from_other_users() {
        let h = harness(Role::Free);
        let other = h.users.insert(Role::Free);
        let scan = h.service.start_scan(h.user_id, "example.com").await.unwrap();

        let result = h.service.get_scan(other, scan.id).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
        let result = h.service.findings(other, scan.id).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn dispatch_request_carries_scan_id_domain_and_callback() {
        let h = harness(Role::Free);
        let scan = h
            .service
            .start_scan(h.user_id, "Sub.Example.COM")
            .await
            .unwrap();

        let calls = h.dispatcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].scan_id, scan.id);
        assert_eq!(calls[0].domain, "sub.example.com");
        assert_eq!(
            calls[0].callback_url,
            "https://app.example.test/api/scan/callback"
        );
    }

    #[tokio::test]
    async fn usage_reports_count_and_limit_for_free_user() {
        let h = harness(Role::Free);
        h.service.start_scan(h.user_id, "example.com").await.unwrap();

        let usage = h.service.usage(h.user_id).await.unwrap();
        assert_eq!(usage.used_today, 1);
        assert_eq!(usage.daily_limit, Some(DAILY_FREE_LIMIT));
        assert!(!usage.entitlement.is_pro);
    }

    #[tokio::test]
    async fn stats_aggregate_scan_and_finding_counts() {
        let h = harness(Role::Free);
        let completed = h.service.start_scan(h.user_id, "example.com").await.unwrap();
        h.service.start_scan(h.user_id, "example.org").await.unwrap();
        h.service
            .ingest(completion(completed.id, vec![finding("xss", Severity::High)]))
            .await
            .unwrap();

        let stats = h.service.stats().await.unwrap();
        assert_eq!(stats.total_scans, 2);
        assert_eq!(stats.completed_scans, 1);
        assert_eq!(stats.pending_scans, 1);
        assert_eq!(stats.failed_scans, 0);
        assert_eq!(stats.total_findings, 1);
    }
}
