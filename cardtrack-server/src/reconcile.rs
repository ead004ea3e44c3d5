//! Reconciliation engine
//!
//! Matches applications against the continuation records uploaded for one
//! date:
//!
//! 1. Load the date's records into a map keyed by `app_id` (empty → `NoData`)
//! 2. Walk every application once. A key hit consumes the key; if the
//!    application was not yet matched its flag flips and one UPDATE audit
//!    entry is written. Already-matched hits are skipped, which is what makes
//!    re-runs idempotent.
//! 3. Applications with no key are reported unmatched
//! 4. Keys left over are continuation records with no application
//!
//! The whole pass is one transaction, and runs for the same date are
//! serialized by a per-date lock so two overlapping runs cannot both observe
//! "not yet matched".

use cardtrack_common::models::{
    Application, ApplicationRecord, ApplicationStatus, AuditAction, CardType, ContinuationRecord,
    Principal,
};
use cardtrack_common::{Error, Result};
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::applications::{self, ApplicationStore};
use crate::continuation::{self, ContinuationStore};
use crate::policy::{self, Operation};

/// Audit remark for flags flipped by a reconciliation run
pub const MATCH_REMARK: &str = "matched with continuation data";

/// Audit remark for manual overrides submitted without one
pub const MANUAL_OVERRIDE_REMARK: &str = "manual continuation match status update";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedApplication {
    pub id: i64,
    pub app_id: String,
    pub customer_name: String,
    pub branch_code: String,
    pub card_type: CardType,
    pub status: ApplicationStatus,
}

impl From<&Application> for UnmatchedApplication {
    fn from(app: &Application) -> Self {
        Self {
            id: app.id,
            app_id: app.app_id.clone(),
            customer_name: app.customer_name.clone(),
            branch_code: app.branch_code.clone(),
            card_type: app.card_type,
            status: app.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedContinuation {
    pub app_id: String,
    pub customer_name: String,
    pub branch_code: String,
}

impl From<ContinuationRecord> for UnmatchedContinuation {
    fn from(record: ContinuationRecord) -> Self {
        Self {
            app_id: record.app_id,
            customer_name: record.customer_name,
            branch_code: record.branch_code,
        }
    }
}

/// Outcome of one reconciliation run
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub upload_date: NaiveDate,
    pub newly_matched_count: usize,
    pub unmatched_applications: Vec<UnmatchedApplication>,
    pub unmatched_continuation_records: Vec<UnmatchedContinuation>,
    pub total_applications: usize,
    pub total_continuation_records: usize,
}

/// Cross-check overview for one upload date
#[derive(Debug, Clone, Serialize)]
pub struct MatchSummary {
    pub upload_date: NaiveDate,
    pub total_applications: i64,
    pub matched_applications: i64,
    pub unmatched_applications: i64,
    pub total_continuation_records: i64,
    /// Percentage of matched applications, two decimals
    pub match_percentage: f64,
}

/// One async mutex per upload date
#[derive(Default)]
struct DateLocks {
    inner: Mutex<HashMap<NaiveDate, Arc<tokio::sync::Mutex<()>>>>,
}

impl DateLocks {
    fn lock_for(&self, date: NaiveDate) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(date).or_default().clone()
    }

    /// Hand back a lock taken with `lock_for`; the entry is dropped once no
    /// other run holds or waits on it.
    fn release(&self, date: NaiveDate, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&date);
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    db: SqlitePool,
    applications: ApplicationStore,
    continuation: ContinuationStore,
    date_locks: Arc<DateLocks>,
}

impl ReconciliationEngine {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            applications: ApplicationStore::new(db.clone()),
            continuation: ContinuationStore::new(db.clone()),
            db,
            date_locks: Arc::new(DateLocks::default()),
        }
    }

    /// Reconcile every application against the records uploaded for `upload_date`
    pub async fn run(&self, upload_date: NaiveDate, actor: &Principal) -> Result<ReconciliationResult> {
        policy::require(actor, Operation::Reconcile, None)?;

        let date_lock = self.date_locks.lock_for(upload_date);
        let result = {
            let _guard = date_lock.lock().await;
            self.run_locked(upload_date, actor).await
        };
        self.date_locks.release(upload_date, date_lock);
        result
    }

    async fn run_locked(&self, upload_date: NaiveDate, actor: &Principal) -> Result<ReconciliationResult> {
        let mut tx = self.db.begin().await?;

        let records = continuation::load_for_date(&mut tx, upload_date).await?;
        if records.is_empty() {
            return Err(Error::NoData(format!(
                "no continuation records uploaded for {}",
                upload_date
            )));
        }
        let total_continuation_records = records.len();
        let mut pending: BTreeMap<String, ContinuationRecord> = records
            .into_iter()
            .map(|record| (record.app_id.clone(), record))
            .collect();

        let all_applications = applications::load_all(&mut tx).await?;
        let total_applications = all_applications.len();
        let mut newly_matched_count = 0;
        let mut unmatched_applications = Vec::new();

        for app in &all_applications {
            if pending.remove(&app.app_id).is_none() {
                unmatched_applications.push(UnmatchedApplication::from(app));
                continue;
            }
            if app.continuation_matched {
                continue;
            }

            let mut matched = app.clone();
            matched.continuation_matched = true;
            applications::write_mutation(
                &mut tx,
                app,
                matched,
                Some(actor.id),
                Some(AuditAction::Update),
                Some(MATCH_REMARK.to_string()),
            )
            .await?;
            newly_matched_count += 1;
        }

        let unmatched_continuation_records: Vec<UnmatchedContinuation> =
            pending.into_values().map(UnmatchedContinuation::from).collect();

        tx.commit().await?;

        info!(
            actor = actor.id,
            %upload_date,
            newly_matched_count,
            unmatched_applications = unmatched_applications.len(),
            unmatched_continuation = unmatched_continuation_records.len(),
            "Reconciliation completed"
        );

        Ok(ReconciliationResult {
            upload_date,
            newly_matched_count,
            unmatched_applications,
            unmatched_continuation_records,
            total_applications,
            total_continuation_records,
        })
    }

    /// Manually set the match flag (e.g. to correct a false negative caused
    /// by a typo in the external file). Same policy and audit trail as any
    /// other update; a supplied remark replaces `continuation_remarks` and is
    /// kept on the audit entry.
    pub async fn set_match_status(
        &self,
        id: i64,
        matched: bool,
        remark: Option<String>,
        actor: &Principal,
    ) -> Result<ApplicationRecord> {
        let mut tx = self.db.begin().await?;
        let current = applications::load_application(&mut tx, id).await?;
        policy::require(actor, Operation::UpdateApplication, current.assigned_to_id)?;

        let mut next = current.clone();
        next.continuation_matched = matched;
        if let Some(remark) = &remark {
            next.continuation_remarks = Some(remark.clone());
        }
        let audit_remark = remark.unwrap_or_else(|| MANUAL_OVERRIDE_REMARK.to_string());

        let written = applications::write_mutation(
            &mut tx,
            &current,
            next,
            Some(actor.id),
            Some(AuditAction::Update),
            Some(audit_remark),
        )
        .await?;
        tx.commit().await?;

        if written.is_some() {
            info!(
                actor = actor.id,
                "Match status of application {} (id {}) set to {}",
                current.app_id,
                id,
                matched
            );
        }
        self.applications.load_record(id).await
    }

    pub async fn summary(&self, upload_date: NaiveDate, actor: &Principal) -> Result<MatchSummary> {
        policy::require(actor, Operation::ReadContinuation, None)?;

        let (total_applications, matched_applications): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(continuation_matched), 0) FROM applications",
        )
        .fetch_one(&self.db)
        .await?;
        let total_continuation_records = self.continuation.count_for_date(upload_date).await?;

        Ok(MatchSummary {
            upload_date,
            total_applications,
            matched_applications,
            unmatched_applications: total_applications - matched_applications,
            total_continuation_records,
            match_percentage: match_percentage(matched_applications, total_applications),
        })
    }
}

fn match_percentage(matched: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let percentage = matched as f64 / total as f64 * 100.0;
    (percentage * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_percentage_rounding() {
        assert_eq!(match_percentage(0, 0), 0.0);
        assert_eq!(match_percentage(1, 3), 33.33);
        assert_eq!(match_percentage(2, 3), 66.67);
        assert_eq!(match_percentage(5, 5), 100.0);
    }

    #[test]
    fn test_date_locks_shared_per_date() {
        let locks = DateLocks::default();
        let d1 = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();

        assert!(Arc::ptr_eq(&locks.lock_for(d1), &locks.lock_for(d1)));
        assert!(!Arc::ptr_eq(&locks.lock_for(d1), &locks.lock_for(d2)));
    }

    #[test]
    fn test_date_lock_released_when_unused() {
        let locks = DateLocks::default();
        let d1 = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let first = locks.lock_for(d1);
        let second = locks.lock_for(d1);
        locks.release(d1, first);
        assert_eq!(locks.inner.lock().unwrap().len(), 1);

        locks.release(d1, second);
        assert!(locks.inner.lock().unwrap().is_empty());
    }
}
