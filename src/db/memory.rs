//! In-process [`LedgerStore`] used by tests and local tooling.
//!
//! All state sits behind one async mutex, so every trait method runs as a
//! single serialized unit, the in-memory counterpart of a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::errors::{DatabaseError, Result};
use crate::db::store::{
    clawback_meta, revoke_meta, shortfall_meta, AdjustmentOutcome, AwardOutcome, BalanceUpdate,
    CancelOutcome, LedgerStore, NewAdjustment, PricingUpdate, RevokeOutcome, RevokeRequest,
    SoftDeleteOutcome,
};
use crate::models::{
    level_for_total, BalanceSnapshot, DownloadEvent, EarningsQuery, EarningsRecord, EarningsRow,
    EarningsStatus, NewEarnings, PageRequest, PointsAdjustmentLog, PointsChange, PointsRecord,
    PointsRecordQuery, PricingChangeLog, Resource, UserAccount,
};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<String, UserAccount>,
    resources: HashMap<String, Resource>,
    downloads: HashMap<String, DownloadEvent>,
    // Append order is chronological for all of the following
    earnings: Vec<EarningsRecord>,
    points_records: Vec<PointsRecord>,
    pricing_logs: Vec<PricingChangeLog>,
    adjustments: Vec<PointsAdjustmentLog>,
}

impl MemoryState {
    fn apply_change(&mut self, change: &PointsChange, now: DateTime<Utc>) -> BalanceUpdate {
        let Some(user) = self.users.get_mut(&change.user_id) else {
            return BalanceUpdate::UserNotFound;
        };

        let (Some(new_balance), Some(new_total)) = (
            user.points_balance.checked_add(change.delta),
            change.next_total(user.points_total),
        ) else {
            return BalanceUpdate::OutOfRange;
        };
        if new_balance < 0 {
            return BalanceUpdate::Insufficient {
                balance: user.points_balance,
            };
        }

        user.points_balance = new_balance;
        user.points_total = new_total;
        user.user_level = level_for_total(new_total).level;

        let record_id = Uuid::new_v4();
        self.points_records.push(PointsRecord {
            record_id,
            user_id: change.user_id.clone(),
            points_change: change.delta,
            points_balance: new_balance,
            change_type: change.meta.change_type.as_str().to_string(),
            source: change.meta.source.clone(),
            source_id: change.meta.source_id.clone(),
            description: change.meta.description.clone(),
            created_at: now,
        });

        BalanceUpdate::Applied(BalanceSnapshot {
            user_id: change.user_id.clone(),
            points_balance: new_balance,
            points_total: new_total,
            user_level: level_for_total(new_total).level,
            record_id,
        })
    }
}

fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Vec<T> {
    items
        .iter()
        .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
        .take(page.page_size as usize)
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserAccount) {
        self.state.lock().await.users.insert(user.user_id.clone(), user);
    }

    pub async fn insert_resource(&self, resource: Resource) {
        self.state
            .lock()
            .await
            .resources
            .insert(resource.resource_id.clone(), resource);
    }

    pub async fn insert_download(&self, download: DownloadEvent) {
        self.state
            .lock()
            .await
            .downloads
            .insert(download.download_id.clone(), download);
    }

    /// Make every write fail with a connection error until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All earnings records, oldest first
    pub async fn earnings_records(&self) -> Vec<EarningsRecord> {
        self.state.lock().await.earnings.clone()
    }

    /// A user's full ledger, oldest first
    pub async fn ledger_for(&self, user_id: &str) -> Vec<PointsRecord> {
        self.state
            .lock()
            .await
            .points_records
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::ConnectionError(
                "memory store is rejecting writes".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>> {
        Ok(self.state.lock().await.users.get(user_id).cloned())
    }

    async fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>> {
        Ok(self.state.lock().await.resources.get(resource_id).cloned())
    }

    async fn get_download(&self, download_id: &str) -> Result<Option<DownloadEvent>> {
        Ok(self.state.lock().await.downloads.get(download_id).cloned())
    }

    async fn update_pricing(&self, update: PricingUpdate) -> Result<Option<PricingChangeLog>> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let Some(resource) = state.resources.get_mut(&update.resource_id) else {
            return Ok(None);
        };

        let log = PricingChangeLog {
            log_id: Uuid::new_v4(),
            resource_id: update.resource_id.clone(),
            operator_id: update.operator_id,
            operator_type: update.operator_type,
            old_pricing_type: resource.pricing_type,
            new_pricing_type: update.pricing.pricing_type().code(),
            old_points_cost: resource.points_cost,
            new_points_cost: update.pricing.points_cost(),
            reason: update.reason,
            created_at: now,
        };

        resource.pricing_type = log.new_pricing_type;
        resource.points_cost = log.new_points_cost;
        resource.updated_at = now;
        state.pricing_logs.push(log.clone());

        Ok(Some(log))
    }

    async fn pricing_history(
        &self,
        resource_id: &str,
        page: PageRequest,
    ) -> Result<(Vec<PricingChangeLog>, i64)> {
        let state = self.state.lock().await;
        let logs: Vec<PricingChangeLog> = state
            .pricing_logs
            .iter()
            .rev()
            .filter(|log| log.resource_id == resource_id)
            .cloned()
            .collect();

        Ok((paginate(&logs, page), logs.len() as i64))
    }

    async fn soft_delete_resource(&self, resource_id: &str) -> Result<SoftDeleteOutcome> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        Ok(match state.resources.get_mut(resource_id) {
            None => SoftDeleteOutcome::NotFound,
            Some(resource) if resource.is_deleted => SoftDeleteOutcome::AlreadyDeleted,
            Some(resource) => {
                resource.is_deleted = true;
                resource.updated_at = Utc::now();
                SoftDeleteOutcome::Deleted
            }
        })
    }

    async fn apply_points_change(&self, change: PointsChange) -> Result<BalanceUpdate> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        Ok(state.apply_change(&change, Utc::now()))
    }

    async fn points_records(
        &self,
        user_id: &str,
        query: &PointsRecordQuery,
    ) -> Result<(Vec<PointsRecord>, i64)> {
        let state = self.state.lock().await;
        let records: Vec<PointsRecord> = state
            .points_records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id && query.matches(r))
            .cloned()
            .collect();

        Ok((paginate(&records, query.page()), records.len() as i64))
    }

    async fn record_award(&self, award: NewEarnings, credit: PointsChange) -> Result<AwardOutcome> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();

        match state.downloads.get(&award.download_id) {
            None => return Ok(AwardOutcome::DownloadNotFound),
            Some(download) if download.earnings_awarded => return Ok(AwardOutcome::AlreadyAwarded),
            Some(_) => {}
        }
        if state.earnings.iter().any(|r| r.download_id == award.download_id) {
            return Ok(AwardOutcome::AlreadyAwarded);
        }
        // Checked up front so a missing uploader leaves no partial writes
        if !state.users.contains_key(&credit.user_id) {
            return Ok(AwardOutcome::UploaderNotFound);
        }

        let balance = match state.apply_change(&credit, now) {
            BalanceUpdate::Applied(snapshot) => snapshot,
            BalanceUpdate::UserNotFound => return Ok(AwardOutcome::UploaderNotFound),
            BalanceUpdate::OutOfRange => {
                return Err(DatabaseError::IntegrityError(format!(
                    "award credit of {} overflows the balance of {}",
                    credit.delta, credit.user_id
                )))
            }
            BalanceUpdate::Insufficient { balance } => {
                return Err(DatabaseError::IntegrityError(format!(
                    "award credit of {} would leave balance {} negative",
                    credit.delta, balance
                )))
            }
        };

        let record = EarningsRecord {
            earning_id: award.earning_id,
            resource_id: award.resource_id,
            uploader_id: award.uploader_id,
            downloader_id: award.downloader_id,
            download_id: award.download_id.clone(),
            pricing_type: award.pricing_type,
            points_cost: award.points_cost,
            earnings_points: award.earnings_points,
            earnings_source: award.earnings_source,
            status: EarningsStatus::Awarded,
            created_at: now,
        };
        state.earnings.push(record.clone());

        if let Some(download) = state.downloads.get_mut(&award.download_id) {
            download.earnings_awarded = true;
        }

        Ok(AwardOutcome::Recorded { record, balance })
    }

    async fn earnings_by_download(&self, download_id: &str) -> Result<Option<EarningsRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .earnings
            .iter()
            .find(|r| r.download_id == download_id)
            .cloned())
    }

    async fn transition_earnings(
        &self,
        resource_id: &str,
        from: &[EarningsStatus],
        to: EarningsStatus,
    ) -> Result<u64> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        let mut moved = 0;
        for record in state
            .earnings
            .iter_mut()
            .filter(|r| r.resource_id == resource_id && from.contains(&r.status))
        {
            record.status = to;
            moved += 1;
        }

        Ok(moved)
    }

    async fn cancel_frozen_earnings(&self, resource_id: &str, reason: &str) -> Result<CancelOutcome> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut outcome = CancelOutcome::default();
        for record in state
            .earnings
            .iter_mut()
            .filter(|r| r.resource_id == resource_id && r.status == EarningsStatus::Frozen)
        {
            record.status = EarningsStatus::Cancelled;
            outcome.cancelled += 1;
            outcome.total_points += record.earnings_points;
        }
        if outcome.cancelled == 0 {
            return Ok(outcome);
        }

        outcome.uploader_id = state
            .resources
            .get(resource_id)
            .and_then(|r| r.uploader_id.clone());

        let Some(uploader_id) = outcome.uploader_id.clone() else {
            outcome.shortfall = outcome.total_points;
            return Ok(outcome);
        };
        let Some(balance) = state.users.get(&uploader_id).map(|u| u.points_balance) else {
            outcome.shortfall = outcome.total_points;
            return Ok(outcome);
        };

        outcome.clawed_back = balance.min(outcome.total_points);
        outcome.shortfall = outcome.total_points - outcome.clawed_back;

        if outcome.clawed_back > 0 {
            state.apply_change(
                &PointsChange {
                    user_id: uploader_id.clone(),
                    delta: -outcome.clawed_back,
                    counts_toward_total: false,
                    meta: clawback_meta(resource_id, reason),
                },
                now,
            );
        }
        if outcome.shortfall > 0 {
            state.apply_change(
                &PointsChange {
                    user_id: uploader_id,
                    delta: 0,
                    counts_toward_total: false,
                    meta: shortfall_meta(resource_id, outcome.shortfall),
                },
                now,
            );
        }

        Ok(outcome)
    }

    async fn earnings_page(
        &self,
        uploader_id: &str,
        query: &EarningsQuery,
    ) -> Result<(Vec<EarningsRow>, i64)> {
        let state = self.state.lock().await;
        let matching: Vec<&EarningsRecord> = state
            .earnings
            .iter()
            .rev()
            .filter(|r| r.uploader_id == uploader_id && query.matches(r))
            .collect();
        let page = query.page();

        let rows = matching
            .iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.page_size as usize)
            .map(|record| {
                let resource = state.resources.get(&record.resource_id);
                EarningsRow {
                    record: (*record).clone(),
                    resource_title: resource.map(|r| r.title.clone()),
                    resource_deleted: resource.map(|r| r.is_deleted),
                }
            })
            .collect();

        Ok((rows, matching.len() as i64))
    }

    async fn awarded_totals(
        &self,
        uploader_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64)> {
        let state = self.state.lock().await;

        Ok(state
            .earnings
            .iter()
            .filter(|r| {
                r.uploader_id == uploader_id
                    && r.status == EarningsStatus::Awarded
                    && since.map_or(true, |since| r.created_at >= since)
            })
            .fold((0, 0), |(sum, count), r| (sum + r.earnings_points, count + 1)))
    }

    async fn record_adjustment(
        &self,
        change: PointsChange,
        adjustment: NewAdjustment,
    ) -> Result<AdjustmentOutcome> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let Some(points_before) = state.users.get(&change.user_id).map(|u| u.points_balance) else {
            return Ok(AdjustmentOutcome::UserNotFound);
        };

        let balance = match state.apply_change(&change, now) {
            BalanceUpdate::Applied(snapshot) => snapshot,
            BalanceUpdate::UserNotFound => return Ok(AdjustmentOutcome::UserNotFound),
            BalanceUpdate::Insufficient { balance } => {
                return Ok(AdjustmentOutcome::Insufficient { balance })
            }
            BalanceUpdate::OutOfRange => return Ok(AdjustmentOutcome::OutOfRange),
        };

        let log = PointsAdjustmentLog {
            log_id: Uuid::new_v4(),
            admin_id: adjustment.admin_id,
            target_user_id: change.user_id.clone(),
            adjustment_type: adjustment.adjustment_type,
            points_change: change.delta,
            points_before,
            points_after: balance.points_balance,
            reason: adjustment.reason,
            is_revoked: false,
            revoked_at: None,
            revoked_by: None,
            revoke_reason: None,
            created_at: now,
        };
        state.adjustments.push(log.clone());

        Ok(AdjustmentOutcome::Applied { balance, log })
    }

    async fn get_adjustment(&self, log_id: Uuid) -> Result<Option<PointsAdjustmentLog>> {
        Ok(self
            .state
            .lock()
            .await
            .adjustments
            .iter()
            .find(|log| log.log_id == log_id)
            .cloned())
    }

    async fn revoke_adjustment(&self, request: RevokeRequest) -> Result<RevokeOutcome> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let Some(index) = state.adjustments.iter().position(|log| log.log_id == request.log_id) else {
            return Ok(RevokeOutcome::LogNotFound);
        };
        let log = state.adjustments[index].clone();

        if log.is_revoked {
            return Ok(RevokeOutcome::AlreadyRevoked);
        }
        if log.created_at < request.not_before {
            return Ok(RevokeOutcome::WindowExpired);
        }

        let revert = PointsChange {
            user_id: log.target_user_id.clone(),
            delta: -log.points_change,
            counts_toward_total: false,
            meta: revoke_meta(log.log_id, &request.reason),
        };
        let balance = match state.apply_change(&revert, now) {
            BalanceUpdate::Applied(snapshot) => snapshot,
            BalanceUpdate::UserNotFound => return Ok(RevokeOutcome::UserNotFound),
            BalanceUpdate::OutOfRange => {
                return Err(DatabaseError::IntegrityError(format!(
                    "revert of adjustment {} overflows the balance",
                    log.log_id
                )))
            }
            BalanceUpdate::Insufficient { balance } => {
                return Ok(RevokeOutcome::PointsConsumed {
                    balance,
                    required: log.points_change,
                })
            }
        };

        let entry = &mut state.adjustments[index];
        entry.is_revoked = true;
        entry.revoked_at = Some(now);
        entry.revoked_by = Some(request.admin_id);
        entry.revoke_reason = Some(request.reason);

        Ok(RevokeOutcome::Revoked {
            balance,
            log: entry.clone(),
        })
    }
}
