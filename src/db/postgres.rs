use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::connection::with_retry;
use crate::db::errors::{DatabaseError, Result};
use crate::db::read_ops::*;
use crate::db::store::{
    clawback_meta, revoke_meta, shortfall_meta, AdjustmentOutcome, AwardOutcome, BalanceUpdate,
    CancelOutcome, LedgerStore, NewAdjustment, PricingUpdate, RevokeOutcome, RevokeRequest,
    SoftDeleteOutcome,
};
use crate::db::write_ops::*;
use crate::models::{
    DownloadEvent, EarningsQuery, EarningsRecord, EarningsRow, EarningsStatus, NewEarnings,
    PageRequest, PointsAdjustmentLog, PointsChange, PointsRecord, PointsRecordQuery,
    PricingChangeLog, Resource, UserAccount,
};

/// Attempts for write units that may hit serialization failures or deadlocks
const WRITE_RETRIES: u8 = 3;

/// [`LedgerStore`] backed by Postgres.
///
/// Each write runs in its own transaction and takes `FOR UPDATE` locks on
/// the rows it mutates, so concurrent callers on the same user or download
/// are serialized by the database.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn update_pricing_once(&self, update: &PricingUpdate) -> Result<Option<PricingChangeLog>> {
        let mut tx = self.pool.begin().await?;

        let Some(current) = lock_resource(&mut tx, &update.resource_id).await? else {
            return Ok(None);
        };
        let log = update_resource_pricing(&mut tx, &current, update).await?;

        tx.commit().await?;
        Ok(Some(log))
    }

    async fn soft_delete_once(&self, resource_id: &str) -> Result<SoftDeleteOutcome> {
        let mut tx = self.pool.begin().await?;

        let outcome = match lock_resource(&mut tx, resource_id).await? {
            None => SoftDeleteOutcome::NotFound,
            Some(resource) if resource.is_deleted => SoftDeleteOutcome::AlreadyDeleted,
            Some(_) => {
                mark_resource_deleted(&mut tx, resource_id).await?;
                SoftDeleteOutcome::Deleted
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn apply_change_once(&self, change: &PointsChange) -> Result<BalanceUpdate> {
        let mut tx = self.pool.begin().await?;
        let update = apply_balance_change(&mut tx, change).await?;

        if matches!(update, BalanceUpdate::Applied(_)) {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(update)
    }

    async fn record_award_once(
        &self,
        award: &NewEarnings,
        credit: &PointsChange,
    ) -> Result<AwardOutcome> {
        let mut tx = self.pool.begin().await?;

        // The download row lock serializes concurrent awards for one download
        let Some(download) = lock_download(&mut tx, &award.download_id).await? else {
            return Ok(AwardOutcome::DownloadNotFound);
        };
        if download.earnings_awarded {
            return Ok(AwardOutcome::AlreadyAwarded);
        }

        let Some(record) = insert_earnings(&mut tx, award).await? else {
            return Ok(AwardOutcome::AlreadyAwarded);
        };
        mark_download_awarded(&mut tx, award).await?;

        let balance = match apply_balance_change(&mut tx, credit).await? {
            BalanceUpdate::Applied(snapshot) => snapshot,
            BalanceUpdate::UserNotFound => {
                tx.rollback().await?;
                return Ok(AwardOutcome::UploaderNotFound);
            }
            BalanceUpdate::OutOfRange => {
                return Err(DatabaseError::IntegrityError(format!(
                    "award credit of {} overflows the balance of {}",
                    credit.delta, credit.user_id
                )));
            }
            BalanceUpdate::Insufficient { balance } => {
                return Err(DatabaseError::IntegrityError(format!(
                    "award credit of {} would leave balance {} negative",
                    credit.delta, balance
                )));
            }
        };

        tx.commit().await?;
        Ok(AwardOutcome::Recorded { record, balance })
    }

    async fn transition_once(
        &self,
        resource_id: &str,
        from: &[EarningsStatus],
        to: EarningsStatus,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let moved = update_earnings_status(&mut tx, resource_id, from, to).await?;
        tx.commit().await?;
        Ok(moved)
    }

    async fn cancel_once(&self, resource_id: &str, reason: &str) -> Result<CancelOutcome> {
        let mut tx = self.pool.begin().await?;

        let (cancelled, total_points) = cancel_frozen(&mut tx, resource_id).await?;
        let mut outcome = CancelOutcome {
            cancelled,
            total_points,
            ..Default::default()
        };
        if cancelled == 0 {
            tx.commit().await?;
            return Ok(outcome);
        }

        outcome.uploader_id = lock_resource(&mut tx, resource_id)
            .await?
            .and_then(|r| r.uploader_id);

        let uploader = match &outcome.uploader_id {
            Some(uploader_id) => lock_user(&mut tx, uploader_id).await?,
            None => None,
        };
        let Some(uploader) = uploader else {
            warn!(resource_id, total_points, "Cancelled earnings have no uploader to claw back from");
            outcome.shortfall = total_points;
            tx.commit().await?;
            return Ok(outcome);
        };

        outcome.clawed_back = uploader.points_balance.min(total_points);
        outcome.shortfall = total_points - outcome.clawed_back;

        if outcome.clawed_back > 0 {
            let clawback = PointsChange {
                user_id: uploader.user_id.clone(),
                delta: -outcome.clawed_back,
                counts_toward_total: false,
                meta: clawback_meta(resource_id, reason),
            };
            if !matches!(apply_balance_change(&mut tx, &clawback).await?, BalanceUpdate::Applied(_)) {
                return Err(DatabaseError::TransactionError(format!(
                    "clawback for resource {} could not be applied",
                    resource_id
                )));
            }
        }
        if outcome.shortfall > 0 {
            let note = PointsChange {
                user_id: uploader.user_id.clone(),
                delta: 0,
                counts_toward_total: false,
                meta: shortfall_meta(resource_id, outcome.shortfall),
            };
            apply_balance_change(&mut tx, &note).await?;
        }

        tx.commit().await?;
        info!(
            resource_id,
            cancelled = outcome.cancelled,
            clawed_back = outcome.clawed_back,
            shortfall = outcome.shortfall,
            "Cancelled frozen earnings"
        );
        Ok(outcome)
    }

    async fn record_adjustment_once(
        &self,
        change: &PointsChange,
        adjustment: &NewAdjustment,
    ) -> Result<AdjustmentOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(user) = lock_user(&mut tx, &change.user_id).await? else {
            return Ok(AdjustmentOutcome::UserNotFound);
        };

        let balance = match apply_balance_change(&mut tx, change).await? {
            BalanceUpdate::Applied(snapshot) => snapshot,
            BalanceUpdate::UserNotFound => return Ok(AdjustmentOutcome::UserNotFound),
            BalanceUpdate::Insufficient { balance } => {
                return Ok(AdjustmentOutcome::Insufficient { balance })
            }
            BalanceUpdate::OutOfRange => return Ok(AdjustmentOutcome::OutOfRange),
        };
        let log = insert_adjustment_log(
            &mut tx,
            adjustment,
            change,
            user.points_balance,
            balance.points_balance,
        )
        .await?;

        tx.commit().await?;
        Ok(AdjustmentOutcome::Applied { balance, log })
    }

    async fn revoke_once(&self, request: &RevokeRequest) -> Result<RevokeOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(log) = lock_adjustment(&mut tx, request.log_id).await? else {
            return Ok(RevokeOutcome::LogNotFound);
        };
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
        let balance = match apply_balance_change(&mut tx, &revert).await? {
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
        let log =
            mark_adjustment_revoked(&mut tx, request.log_id, &request.admin_id, &request.reason)
                .await?;

        tx.commit().await?;
        Ok(RevokeOutcome::Revoked { balance, log })
    }
}

// Returning early without commit drops the transaction, which rolls it back.
#[async_trait]
impl LedgerStore for PgStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>> {
        load_user(&self.pool, user_id).await
    }

    async fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>> {
        load_resource(&self.pool, resource_id).await
    }

    async fn get_download(&self, download_id: &str) -> Result<Option<DownloadEvent>> {
        load_download(&self.pool, download_id).await
    }

    async fn update_pricing(&self, update: PricingUpdate) -> Result<Option<PricingChangeLog>> {
        with_retry(WRITE_RETRIES, || self.update_pricing_once(&update)).await
    }

    async fn pricing_history(
        &self,
        resource_id: &str,
        page: PageRequest,
    ) -> Result<(Vec<PricingChangeLog>, i64)> {
        load_pricing_history(&self.pool, resource_id, page).await
    }

    async fn soft_delete_resource(&self, resource_id: &str) -> Result<SoftDeleteOutcome> {
        with_retry(WRITE_RETRIES, || self.soft_delete_once(resource_id)).await
    }

    async fn apply_points_change(&self, change: PointsChange) -> Result<BalanceUpdate> {
        with_retry(WRITE_RETRIES, || self.apply_change_once(&change)).await
    }

    async fn points_records(
        &self,
        user_id: &str,
        query: &PointsRecordQuery,
    ) -> Result<(Vec<PointsRecord>, i64)> {
        load_points_records(&self.pool, user_id, query).await
    }

    async fn record_award(&self, award: NewEarnings, credit: PointsChange) -> Result<AwardOutcome> {
        with_retry(WRITE_RETRIES, || self.record_award_once(&award, &credit)).await
    }

    async fn earnings_by_download(&self, download_id: &str) -> Result<Option<EarningsRecord>> {
        load_earnings_by_download(&self.pool, download_id).await
    }

    async fn transition_earnings(
        &self,
        resource_id: &str,
        from: &[EarningsStatus],
        to: EarningsStatus,
    ) -> Result<u64> {
        with_retry(WRITE_RETRIES, || self.transition_once(resource_id, from, to)).await
    }

    async fn cancel_frozen_earnings(&self, resource_id: &str, reason: &str) -> Result<CancelOutcome> {
        with_retry(WRITE_RETRIES, || self.cancel_once(resource_id, reason)).await
    }

    async fn earnings_page(
        &self,
        uploader_id: &str,
        query: &EarningsQuery,
    ) -> Result<(Vec<EarningsRow>, i64)> {
        load_earnings_page(&self.pool, uploader_id, query).await
    }

    async fn awarded_totals(
        &self,
        uploader_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64)> {
        load_awarded_totals(&self.pool, uploader_id, since).await
    }

    async fn record_adjustment(
        &self,
        change: PointsChange,
        adjustment: NewAdjustment,
    ) -> Result<AdjustmentOutcome> {
        with_retry(WRITE_RETRIES, || self.record_adjustment_once(&change, &adjustment)).await
    }

    async fn get_adjustment(&self, log_id: Uuid) -> Result<Option<PointsAdjustmentLog>> {
        load_adjustment(&self.pool, log_id).await
    }

    async fn revoke_adjustment(&self, request: RevokeRequest) -> Result<RevokeOutcome> {
        with_retry(WRITE_RETRIES, || self.revoke_once(&request)).await
    }
}
