use tracing::info;

use crate::db::{AdjustmentOutcome, BalanceUpdate, LedgerStore, NewAdjustment};
use crate::domain::DomainError;
use crate::models::{
    level_for_total, AdjustmentType, BalanceSnapshot, ChangeType, LevelBand, Page, PointsChange,
    PointsMeta, PointsRecord, PointsRecordQuery, UserPointsInfo, LEVEL_BANDS,
};

/// Level for a lifetime points total
pub fn calculate_user_level(total_points: i64) -> i16 {
    level_for_total(total_points).level
}

pub fn level_band(level: i16) -> Option<&'static LevelBand> {
    LEVEL_BANDS.iter().find(|band| band.level == level)
}

/// Points still needed to reach the next level, `None` at the top level
pub fn next_level_points(total_points: i64) -> Option<i64> {
    level_for_total(total_points)
        .max_points
        .map(|max| max + 1 - total_points.max(0))
}

/// Credit a user; raises balance, lifetime total and level
#[tracing::instrument(skip(store, meta))]
pub async fn add_points<S>(
    store: &S,
    user_id: &str,
    points: i64,
    meta: PointsMeta,
) -> Result<BalanceSnapshot, DomainError>
where
    S: LedgerStore + ?Sized,
{
    if points <= 0 {
        return Err(DomainError::InvalidPoints(points));
    }

    let change = PointsChange {
        user_id: user_id.to_string(),
        delta: points,
        counts_toward_total: true,
        meta,
    };

    match store.apply_points_change(change).await? {
        BalanceUpdate::Applied(snapshot) => {
            info!(points_balance = snapshot.points_balance, "Points added");
            Ok(snapshot)
        }
        BalanceUpdate::UserNotFound => Err(DomainError::UserNotFound(user_id.to_string())),
        BalanceUpdate::Insufficient { balance } => Err(DomainError::NegativeBalance {
            balance,
            change: points,
        }),
        BalanceUpdate::OutOfRange => Err(DomainError::InvalidPoints(points)),
    }
}

/// Spend points. Only the balance drops; total and level stay.
#[tracing::instrument(skip(store, meta))]
pub async fn deduct_points<S>(
    store: &S,
    user_id: &str,
    points: i64,
    meta: PointsMeta,
) -> Result<BalanceSnapshot, DomainError>
where
    S: LedgerStore + ?Sized,
{
    if points <= 0 {
        return Err(DomainError::InvalidPoints(points));
    }

    let change = PointsChange {
        user_id: user_id.to_string(),
        delta: -points,
        counts_toward_total: false,
        meta,
    };

    match store.apply_points_change(change).await? {
        BalanceUpdate::Applied(snapshot) => {
            info!(points_balance = snapshot.points_balance, "Points deducted");
            Ok(snapshot)
        }
        BalanceUpdate::UserNotFound => Err(DomainError::UserNotFound(user_id.to_string())),
        BalanceUpdate::Insufficient { balance } => Err(DomainError::InsufficientPoints {
            balance,
            required: points,
        }),
        BalanceUpdate::OutOfRange => Err(DomainError::InvalidPoints(points)),
    }
}

/// Signed admin correction. Positive changes count toward the lifetime
/// total, negative ones only lower the balance.
#[tracing::instrument(skip(store))]
pub async fn adjust_user_points<S>(
    store: &S,
    user_id: &str,
    points_change: i64,
    reason: &str,
    admin_id: &str,
) -> Result<BalanceSnapshot, DomainError>
where
    S: LedgerStore + ?Sized,
{
    if points_change == 0 {
        return Err(DomainError::InvalidPoints(points_change));
    }

    let (change_type, adjustment_type) = if points_change > 0 {
        (ChangeType::AdminAdd, AdjustmentType::Add)
    } else {
        (ChangeType::AdminDeduct, AdjustmentType::Deduct)
    };
    let change = PointsChange {
        user_id: user_id.to_string(),
        delta: points_change,
        counts_toward_total: points_change > 0,
        meta: PointsMeta::new(change_type, "admin_adjust").with_description(reason),
    };
    let adjustment = NewAdjustment {
        admin_id: admin_id.to_string(),
        adjustment_type,
        reason: reason.to_string(),
    };

    match store.record_adjustment(change, adjustment).await? {
        AdjustmentOutcome::Applied { balance, log } => {
            info!(log_id = %log.log_id, points_balance = balance.points_balance, "Points adjusted");
            Ok(balance)
        }
        AdjustmentOutcome::UserNotFound => Err(DomainError::UserNotFound(user_id.to_string())),
        AdjustmentOutcome::Insufficient { balance } => Err(DomainError::NegativeBalance {
            balance,
            change: points_change,
        }),
        AdjustmentOutcome::OutOfRange => Err(DomainError::InvalidPoints(points_change)),
    }
}

pub async fn get_user_points_info<S>(store: &S, user_id: &str) -> Result<UserPointsInfo, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let user = store
        .get_user(user_id)
        .await?
        .ok_or_else(|| DomainError::UserNotFound(user_id.to_string()))?;
    let band = level_for_total(user.points_total);

    Ok(UserPointsInfo {
        points_balance: user.points_balance,
        points_total: user.points_total,
        user_level: band.level,
        level_name: band.name.to_string(),
        level_discount: band.discount(),
        level_privileges: band.privileges.iter().map(|p| p.to_string()).collect(),
        next_level_points: next_level_points(user.points_total),
    })
}

/// A user's ledger lines, newest first
pub async fn get_points_records<S>(
    store: &S,
    user_id: &str,
    query: &PointsRecordQuery,
) -> Result<Page<PointsRecord>, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let page = query.page();
    let (records, total) = store.points_records(user_id, query).await?;
    Ok(Page::new(records, total, page))
}
