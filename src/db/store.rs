use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::errors::Result;
use crate::models::{
    AdjustmentType, BalanceSnapshot, ChangeType, DownloadEvent, EarningsQuery, EarningsRecord, EarningsRow,
    EarningsStatus, NewEarnings, OperatorType, PageRequest, PointsAdjustmentLog, PointsChange, PointsMeta,
    PointsRecord, PointsRecordQuery, PricingChangeLog, Pricing, Resource, UserAccount,
};

/// New pricing for a resource plus the audit fields of the change
#[derive(Debug, Clone, PartialEq)]
pub struct PricingUpdate {
    pub resource_id: String,
    pub pricing: Pricing,
    pub operator_id: String,
    pub operator_type: OperatorType,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftDeleteOutcome {
    Deleted,
    AlreadyDeleted,
    NotFound,
}

/// Result of a guarded balance mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceUpdate {
    Applied(BalanceSnapshot),
    UserNotFound,
    /// `balance + delta` would have gone negative; nothing was written
    Insufficient { balance: i64 },
    /// Balance or lifetime total would overflow; nothing was written
    OutOfRange,
}

/// Result of the single award transaction keyed by download id
#[derive(Debug, Clone, PartialEq)]
pub enum AwardOutcome {
    Recorded {
        record: EarningsRecord,
        balance: BalanceSnapshot,
    },
    DownloadNotFound,
    /// The download already carries an award; nothing was written
    AlreadyAwarded,
    /// The uploader row is missing; the whole unit was rolled back
    UploaderNotFound,
}

/// Summary of a per-resource cancellation and its clawback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub cancelled: u64,
    pub total_points: i64,
    pub uploader_id: Option<String>,
    /// Points actually removed from the uploader's balance
    pub clawed_back: i64,
    /// Part of `total_points` the zero clamp left unrecovered
    pub shortfall: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAdjustment {
    pub admin_id: String,
    pub adjustment_type: AdjustmentType,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustmentOutcome {
    Applied {
        balance: BalanceSnapshot,
        log: PointsAdjustmentLog,
    },
    UserNotFound,
    Insufficient { balance: i64 },
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeRequest {
    pub log_id: Uuid,
    pub admin_id: String,
    pub reason: String,
    /// Adjustments created before this instant can no longer be revoked
    pub not_before: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked {
        balance: BalanceSnapshot,
        log: PointsAdjustmentLog,
    },
    LogNotFound,
    AlreadyRevoked,
    WindowExpired,
    UserNotFound,
    /// The user already spent part of the adjusted points
    PointsConsumed { balance: i64, required: i64 },
}

/// Persistence boundary of the ledger.
///
/// Every write method is one atomic unit: either all of its rows are
/// written or none are. Balance changes are guarded so that
/// `points_balance` never drops below zero, and concurrent mutations of the
/// same user are serialized by the implementation.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>>;

    async fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>>;

    async fn get_download(&self, download_id: &str) -> Result<Option<DownloadEvent>>;

    /// Update a resource's pricing and append its change log.
    /// Returns `None` when the resource does not exist.
    async fn update_pricing(&self, update: PricingUpdate) -> Result<Option<PricingChangeLog>>;

    /// Newest first
    async fn pricing_history(
        &self,
        resource_id: &str,
        page: PageRequest,
    ) -> Result<(Vec<PricingChangeLog>, i64)>;

    async fn soft_delete_resource(&self, resource_id: &str) -> Result<SoftDeleteOutcome>;

    async fn apply_points_change(&self, change: PointsChange) -> Result<BalanceUpdate>;

    /// Newest first
    async fn points_records(
        &self,
        user_id: &str,
        query: &PointsRecordQuery,
    ) -> Result<(Vec<PointsRecord>, i64)>;

    /// Insert the earnings record, flag the download as awarded and credit
    /// the uploader, all in one transaction. At most one award per
    /// `download_id` ever commits.
    async fn record_award(&self, award: NewEarnings, credit: PointsChange) -> Result<AwardOutcome>;

    async fn earnings_by_download(&self, download_id: &str) -> Result<Option<EarningsRecord>>;

    /// Move every record of the resource in one of `from` to `to`.
    /// Returns the number of records moved.
    async fn transition_earnings(
        &self,
        resource_id: &str,
        from: &[EarningsStatus],
        to: EarningsStatus,
    ) -> Result<u64>;

    /// Cancel the resource's frozen records and claw the summed points back
    /// from its uploader, clamping the balance at zero.
    async fn cancel_frozen_earnings(&self, resource_id: &str, reason: &str) -> Result<CancelOutcome>;

    /// Newest first, joined with resource title and deletion flag
    async fn earnings_page(
        &self,
        uploader_id: &str,
        query: &EarningsQuery,
    ) -> Result<(Vec<EarningsRow>, i64)>;

    /// Sum and count of awarded earnings, optionally from `since` onwards
    async fn awarded_totals(
        &self,
        uploader_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64)>;

    /// Apply an admin balance change and write its adjustment log
    async fn record_adjustment(
        &self,
        change: PointsChange,
        adjustment: NewAdjustment,
    ) -> Result<AdjustmentOutcome>;

    async fn get_adjustment(&self, log_id: Uuid) -> Result<Option<PointsAdjustmentLog>>;

    async fn revoke_adjustment(&self, request: RevokeRequest) -> Result<RevokeOutcome>;
}

/// Ledger attribution for the compensating line of a cancellation
pub(crate) fn clawback_meta(resource_id: &str, reason: &str) -> PointsMeta {
    PointsMeta::new(ChangeType::AdminDeduct, "earnings_cancelled")
        .with_source_id(resource_id)
        .with_description(format!("收益取消: {}", reason))
}

/// Zero-delta line documenting the part of a clawback the clamp swallowed
pub(crate) fn shortfall_meta(resource_id: &str, shortfall: i64) -> PointsMeta {
    PointsMeta::new(ChangeType::ClawbackShortfall, "earnings_cancelled")
        .with_source_id(resource_id)
        .with_description(format!("收益取消未追回积分: {}", shortfall))
}

pub(crate) fn revoke_meta(log_id: Uuid, reason: &str) -> PointsMeta {
    PointsMeta::new(ChangeType::AdminRevoke, "admin_adjustment_revoke")
        .with_source_id(log_id.to_string())
        .with_description(format!("撤销积分调整: {}", reason))
}
