use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::errors::{DatabaseError, Result};
use crate::db::read_ops::{
    adjustment_from_row, download_from_row, earnings_from_row, pricing_log_from_row,
    resource_from_row, user_from_row, ADJUSTMENT_COLUMNS, DOWNLOAD_COLUMNS, EARNINGS_COLUMNS,
    RESOURCE_COLUMNS, USER_COLUMNS,
};
use crate::db::store::{BalanceUpdate, NewAdjustment, PricingUpdate};
use crate::models::{
    level_for_total, BalanceSnapshot, DownloadEvent, EarningsRecord, EarningsStatus, NewEarnings,
    PointsAdjustmentLog, PointsChange, PricingChangeLog, Resource, UserAccount,
};

/// Lock a user row for the rest of the transaction
pub async fn lock_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
) -> Result<Option<UserAccount>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM users WHERE user_id = $1 FOR UPDATE",
        USER_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn lock_resource(
    tx: &mut Transaction<'_, Postgres>,
    resource_id: &str,
) -> Result<Option<Resource>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM resources WHERE resource_id = $1 FOR UPDATE",
        RESOURCE_COLUMNS
    ))
    .bind(resource_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    row.as_ref().map(resource_from_row).transpose()
}

pub async fn lock_download(
    tx: &mut Transaction<'_, Postgres>,
    download_id: &str,
) -> Result<Option<DownloadEvent>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM download_history WHERE download_id = $1 FOR UPDATE",
        DOWNLOAD_COLUMNS
    ))
    .bind(download_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    row.as_ref().map(download_from_row).transpose()
}

/// Apply a balance change and append its ledger line.
///
/// The user row is locked first; the update itself is additionally guarded
/// on the post-change balance so it can never go below zero.
#[tracing::instrument(skip(tx, change), fields(user_id = %change.user_id, delta = change.delta))]
pub async fn apply_balance_change(
    tx: &mut Transaction<'_, Postgres>,
    change: &PointsChange,
) -> Result<BalanceUpdate> {
    let Some(user) = lock_user(tx, &change.user_id).await? else {
        return Ok(BalanceUpdate::UserNotFound);
    };
    let (Some(new_balance), Some(new_total)) = (
        user.points_balance.checked_add(change.delta),
        change.next_total(user.points_total),
    ) else {
        return Ok(BalanceUpdate::OutOfRange);
    };
    if new_balance < 0 {
        return Ok(BalanceUpdate::Insufficient {
            balance: user.points_balance,
        });
    }

    let new_level = level_for_total(new_total).level;

    let updated = sqlx::query(
        r#"
        UPDATE users
        SET points_balance = points_balance + $2,
            points_total = $3,
            user_level = $4,
            updated_at = NOW()
        WHERE user_id = $1
          AND points_balance + $2 >= 0
        RETURNING points_balance
        "#,
    )
    .bind(&change.user_id)
    .bind(change.delta)
    .bind(new_total)
    .bind(new_level)
    .fetch_optional(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    let Some(updated) = updated else {
        return Ok(BalanceUpdate::Insufficient {
            balance: user.points_balance,
        });
    };
    let new_balance: i64 = updated.try_get("points_balance")?;

    let record_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO points_records (
            record_id, user_id, points_change, points_balance,
            change_type, source, source_id, description, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        "#,
    )
    .bind(record_id)
    .bind(&change.user_id)
    .bind(change.delta)
    .bind(new_balance)
    .bind(change.meta.change_type.as_str())
    .bind(&change.meta.source)
    .bind(change.meta.source_id.as_deref())
    .bind(change.meta.description.as_deref())
    .execute(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    debug!(new_balance, new_total, "Applied balance change");
    Ok(BalanceUpdate::Applied(BalanceSnapshot {
        user_id: change.user_id.clone(),
        points_balance: new_balance,
        points_total: new_total,
        user_level: new_level,
        record_id,
    }))
}

/// Write new pricing onto a locked resource row and append the change log
pub async fn update_resource_pricing(
    tx: &mut Transaction<'_, Postgres>,
    current: &Resource,
    update: &PricingUpdate,
) -> Result<PricingChangeLog> {
    sqlx::query(
        r#"
        UPDATE resources
        SET pricing_type = $2, points_cost = $3, updated_at = NOW()
        WHERE resource_id = $1
        "#,
    )
    .bind(&update.resource_id)
    .bind(update.pricing.pricing_type().code())
    .bind(update.pricing.points_cost())
    .execute(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    let row = sqlx::query(
        r#"
        INSERT INTO pricing_change_logs (
            log_id, resource_id, operator_id, operator_type, old_pricing_type,
            new_pricing_type, old_points_cost, new_points_cost, reason, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
        RETURNING log_id, resource_id, operator_id, operator_type, old_pricing_type,
                  new_pricing_type, old_points_cost, new_points_cost, reason, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&update.resource_id)
    .bind(&update.operator_id)
    .bind(update.operator_type.as_str())
    .bind(current.pricing_type)
    .bind(update.pricing.pricing_type().code())
    .bind(current.points_cost)
    .bind(update.pricing.points_cost())
    .bind(update.reason.as_deref())
    .fetch_one(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    info!(resource_id = %update.resource_id, "Updated resource pricing");
    pricing_log_from_row(&row)
}

/// Returns the number of rows flagged; 0 when missing or already deleted
pub async fn mark_resource_deleted(
    tx: &mut Transaction<'_, Postgres>,
    resource_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE resources
        SET is_deleted = TRUE, updated_at = NOW()
        WHERE resource_id = $1 AND is_deleted = FALSE
        "#,
    )
    .bind(resource_id)
    .execute(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(result.rows_affected())
}

/// Insert an awarded earnings record. Returns `None` when the download
/// already has one.
pub async fn insert_earnings(
    tx: &mut Transaction<'_, Postgres>,
    award: &NewEarnings,
) -> Result<Option<EarningsRecord>> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO earnings_records (
            earning_id, resource_id, uploader_id, downloader_id, download_id,
            pricing_type, points_cost, earnings_points, earnings_source, status,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
        ON CONFLICT (download_id) DO NOTHING
        RETURNING {}
        "#,
        EARNINGS_COLUMNS
    ))
    .bind(award.earning_id)
    .bind(&award.resource_id)
    .bind(&award.uploader_id)
    .bind(&award.downloader_id)
    .bind(&award.download_id)
    .bind(award.pricing_type)
    .bind(award.points_cost)
    .bind(award.earnings_points)
    .bind(award.earnings_source.as_str())
    .bind(EarningsStatus::Awarded.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    row.as_ref().map(earnings_from_row).transpose()
}

pub async fn mark_download_awarded(
    tx: &mut Transaction<'_, Postgres>,
    award: &NewEarnings,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE download_history
        SET earnings_awarded = TRUE, uploader_id = $2, downloader_type = $3
        WHERE download_id = $1
        "#,
    )
    .bind(&award.download_id)
    .bind(&award.uploader_id)
    .bind(award.downloader_type.as_str())
    .execute(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(())
}

/// Bulk status move for one resource; no per-record version check
pub async fn update_earnings_status(
    tx: &mut Transaction<'_, Postgres>,
    resource_id: &str,
    from: &[EarningsStatus],
    to: EarningsStatus,
) -> Result<u64> {
    let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();

    let result = sqlx::query(
        r#"
        UPDATE earnings_records
        SET status = $3, updated_at = NOW()
        WHERE resource_id = $1 AND status = ANY($2)
        "#,
    )
    .bind(resource_id)
    .bind(&from[..])
    .bind(to.as_str())
    .execute(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(result.rows_affected())
}

/// Cancel the frozen records of a resource, returning their count and sum
pub async fn cancel_frozen(
    tx: &mut Transaction<'_, Postgres>,
    resource_id: &str,
) -> Result<(u64, i64)> {
    let row = sqlx::query(
        r#"
        WITH cancelled AS (
            UPDATE earnings_records
            SET status = 'cancelled', updated_at = NOW()
            WHERE resource_id = $1 AND status = 'frozen'
            RETURNING earnings_points
        )
        SELECT COUNT(*) AS cancelled,
               COALESCE(SUM(earnings_points), 0)::BIGINT AS total_points
        FROM cancelled
        "#,
    )
    .bind(resource_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    let cancelled: i64 = row.try_get("cancelled")?;
    Ok((cancelled as u64, row.try_get("total_points")?))
}

pub async fn insert_adjustment_log(
    tx: &mut Transaction<'_, Postgres>,
    adjustment: &NewAdjustment,
    change: &PointsChange,
    points_before: i64,
    points_after: i64,
) -> Result<PointsAdjustmentLog> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO points_adjustment_logs (
            log_id, admin_id, target_user_id, adjustment_type, points_change,
            points_before, points_after, reason, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        RETURNING {}
        "#,
        ADJUSTMENT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(&adjustment.admin_id)
    .bind(&change.user_id)
    .bind(adjustment.adjustment_type.as_str())
    .bind(change.delta)
    .bind(points_before)
    .bind(points_after)
    .bind(&adjustment.reason)
    .fetch_one(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    adjustment_from_row(&row)
}

pub async fn lock_adjustment(
    tx: &mut Transaction<'_, Postgres>,
    log_id: Uuid,
) -> Result<Option<PointsAdjustmentLog>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM points_adjustment_logs WHERE log_id = $1 FOR UPDATE",
        ADJUSTMENT_COLUMNS
    ))
    .bind(log_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    row.as_ref().map(adjustment_from_row).transpose()
}

pub async fn mark_adjustment_revoked(
    tx: &mut Transaction<'_, Postgres>,
    log_id: Uuid,
    admin_id: &str,
    reason: &str,
) -> Result<PointsAdjustmentLog> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE points_adjustment_logs
        SET is_revoked = TRUE, revoked_at = NOW(), revoked_by = $2, revoke_reason = $3
        WHERE log_id = $1
        RETURNING {}
        "#,
        ADJUSTMENT_COLUMNS
    ))
    .bind(log_id)
    .bind(admin_id)
    .bind(reason)
    .fetch_one(&mut **tx)
    .await
    .map_err(DatabaseError::QueryError)?;

    adjustment_from_row(&row)
}
