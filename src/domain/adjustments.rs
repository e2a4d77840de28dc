//! Admin tooling for manual balance corrections and gifts.
//!
//! Every applied adjustment writes a [`PointsAdjustmentLog`] next to its
//! ledger line, and can be revoked once within the configured window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AdjustmentPolicy;
use crate::db::{AdjustmentOutcome, LedgerStore, NewAdjustment, RevokeOutcome, RevokeRequest};
use crate::domain::DomainError;
use crate::models::{AdjustmentType, PointsAdjustmentLog, PointsChange, PointsMeta};

pub const MIN_REASON_CHARS: usize = 5;
pub const MAX_REASON_CHARS: usize = 200;

/// Reasons are required and must be 5 to 200 characters long
pub fn validate_reason(reason: &str) -> Result<(), DomainError> {
    if reason.trim().is_empty() {
        return Err(DomainError::InvalidReason("调整原因不能为空".to_string()));
    }

    let chars = reason.chars().count();
    if chars < MIN_REASON_CHARS {
        return Err(DomainError::InvalidReason("调整原因不能少于5个字符".to_string()));
    }
    if chars > MAX_REASON_CHARS {
        return Err(DomainError::InvalidReason("调整原因不能超过200个字符".to_string()));
    }
    Ok(())
}

/// Large amounts or wide batches need a second approver
pub fn requires_approval(points_change: i64, user_count: usize, policy: &AdjustmentPolicy) -> bool {
    points_change.abs() >= policy.approval_threshold || user_count >= policy.batch_approval_users
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAdjustment {
    pub admin_id: String,
    pub target_user_id: String,
    pub adjustment_type: AdjustmentType,
    /// Positive amount; the adjustment type decides the sign
    pub points: i64,
    pub reason: String,
}

/// Apply one admin adjustment and write its log
#[tracing::instrument(skip(store, request, policy), fields(
    admin_id = %request.admin_id,
    target_user_id = %request.target_user_id,
    adjustment_type = request.adjustment_type.as_str(),
))]
pub async fn apply_adjustment<S>(
    store: &S,
    request: AdminAdjustment,
    policy: &AdjustmentPolicy,
) -> Result<PointsAdjustmentLog, DomainError>
where
    S: LedgerStore + ?Sized,
{
    validate_reason(&request.reason)?;
    if request.points <= 0 {
        return Err(DomainError::InvalidPoints(request.points));
    }
    if request.points > policy.max_single_adjustment {
        return Err(DomainError::ExceedLimit {
            points: request.points,
            limit: policy.max_single_adjustment,
        });
    }

    let is_deduct = request.adjustment_type == AdjustmentType::Deduct;
    let delta = if is_deduct { -request.points } else { request.points };
    let description = format!(
        "管理员{}积分: {}",
        if is_deduct { "扣除" } else { "增加" },
        request.reason
    );

    let change = PointsChange {
        user_id: request.target_user_id.clone(),
        delta,
        counts_toward_total: delta > 0,
        meta: PointsMeta::new(request.adjustment_type.change_type(), "admin_adjustment")
            .with_description(description),
    };
    let adjustment = NewAdjustment {
        admin_id: request.admin_id,
        adjustment_type: request.adjustment_type,
        reason: request.reason,
    };

    match store.record_adjustment(change, adjustment).await? {
        AdjustmentOutcome::Applied { log, .. } => {
            info!(
                log_id = %log.log_id,
                points_change = log.points_change,
                points_after = log.points_after,
                "Admin adjustment applied"
            );
            Ok(log)
        }
        AdjustmentOutcome::UserNotFound => Err(DomainError::UserNotFound(request.target_user_id)),
        AdjustmentOutcome::Insufficient { balance } => Err(DomainError::InsufficientPoints {
            balance,
            required: request.points,
        }),
        AdjustmentOutcome::OutOfRange => Err(DomainError::InvalidPoints(request.points)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedGift {
    pub user_id: String,
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGiftResult {
    pub total_users: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub failed_users: Vec<FailedGift>,
}

/// Gift the same amount to every user, continuing past per-user failures.
/// Reason and amount are checked once up front.
#[tracing::instrument(skip(store, user_ids, policy), fields(users = user_ids.len()))]
pub async fn batch_gift_points<S>(
    store: &S,
    admin_id: &str,
    user_ids: &[String],
    points: i64,
    reason: &str,
    policy: &AdjustmentPolicy,
) -> Result<BatchGiftResult, DomainError>
where
    S: LedgerStore + ?Sized,
{
    validate_reason(reason)?;
    if points <= 0 {
        return Err(DomainError::InvalidPoints(points));
    }

    let mut result = BatchGiftResult {
        total_users: user_ids.len(),
        ..Default::default()
    };

    for user_id in user_ids {
        let request = AdminAdjustment {
            admin_id: admin_id.to_string(),
            target_user_id: user_id.clone(),
            adjustment_type: AdjustmentType::BatchGift,
            points,
            reason: reason.to_string(),
        };
        match apply_adjustment(store, request, policy).await {
            Ok(_) => result.success_count += 1,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Batch gift failed for user");
                result.failed_count += 1;
                result.failed_users.push(FailedGift {
                    user_id: user_id.clone(),
                    code: e.code().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        success = result.success_count,
        failed = result.failed_count,
        "Batch gift finished"
    );
    Ok(result)
}

pub async fn revoke_adjustment<S>(
    store: &S,
    log_id: Uuid,
    admin_id: &str,
    reason: &str,
    policy: &AdjustmentPolicy,
) -> Result<PointsAdjustmentLog, DomainError>
where
    S: LedgerStore + ?Sized,
{
    revoke_adjustment_at(store, log_id, admin_id, reason, policy, Utc::now()).await
}

/// Revert an adjustment's balance effect. The lifetime total is left as is.
#[tracing::instrument(skip(store, policy))]
pub async fn revoke_adjustment_at<S>(
    store: &S,
    log_id: Uuid,
    admin_id: &str,
    reason: &str,
    policy: &AdjustmentPolicy,
    now: DateTime<Utc>,
) -> Result<PointsAdjustmentLog, DomainError>
where
    S: LedgerStore + ?Sized,
{
    if reason.trim().is_empty() {
        return Err(DomainError::InvalidReason("撤销原因不能为空".to_string()));
    }

    let request = RevokeRequest {
        log_id,
        admin_id: admin_id.to_string(),
        reason: reason.to_string(),
        not_before: now - policy.revoke_window,
    };

    match store.revoke_adjustment(request).await? {
        RevokeOutcome::Revoked { balance, log } => {
            info!(points_balance = balance.points_balance, "Adjustment revoked");
            Ok(log)
        }
        RevokeOutcome::LogNotFound => Err(DomainError::LogNotFound(log_id.to_string())),
        RevokeOutcome::AlreadyRevoked => Err(DomainError::AlreadyRevoked(log_id.to_string())),
        RevokeOutcome::WindowExpired => Err(DomainError::RevokeWindowExpired(log_id.to_string())),
        RevokeOutcome::UserNotFound => Err(DomainError::UserNotFound(log_id.to_string())),
        RevokeOutcome::PointsConsumed { balance, required } => {
            Err(DomainError::PointsConsumed { balance, required })
        }
    }
}

pub async fn get_adjustment<S>(store: &S, log_id: Uuid) -> Result<PointsAdjustmentLog, DomainError>
where
    S: LedgerStore + ?Sized,
{
    store
        .get_adjustment(log_id)
        .await?
        .ok_or_else(|| DomainError::LogNotFound(log_id.to_string()))
}
