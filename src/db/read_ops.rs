use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::db::errors::{DatabaseError, Result};
use crate::models::{
    AdjustmentType, DownloadEvent, EarningsQuery, EarningsRecord, EarningsRow, EarningsSource,
    EarningsStatus, OperatorType, PageRequest, PointsAdjustmentLog, PointsRecord,
    PointsRecordQuery, PricingChangeLog, Resource, UserAccount,
};

pub(crate) const USER_COLUMNS: &str =
    "user_id, vip_level, points_balance, points_total, user_level";

pub(crate) const RESOURCE_COLUMNS: &str =
    "resource_id, user_id, title, pricing_type, points_cost, is_deleted, created_at, updated_at";

pub(crate) const DOWNLOAD_COLUMNS: &str =
    "download_id, user_id, resource_id, earnings_awarded, created_at";

pub(crate) const EARNINGS_COLUMNS: &str = "earning_id, resource_id, uploader_id, downloader_id, \
    download_id, pricing_type, points_cost, earnings_points, earnings_source, status, created_at";

pub(crate) const ADJUSTMENT_COLUMNS: &str = "log_id, admin_id, target_user_id, adjustment_type, \
    points_change, points_before, points_after, reason, is_revoked, revoked_at, revoked_by, \
    revoke_reason, created_at";

pub(crate) fn user_from_row(row: &PgRow) -> Result<UserAccount> {
    Ok(UserAccount {
        user_id: row.try_get("user_id")?,
        vip_level: row.try_get("vip_level")?,
        points_balance: row.try_get("points_balance")?,
        points_total: row.try_get("points_total")?,
        user_level: row.try_get("user_level")?,
    })
}

pub(crate) fn resource_from_row(row: &PgRow) -> Result<Resource> {
    Ok(Resource {
        resource_id: row.try_get("resource_id")?,
        uploader_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        pricing_type: row.try_get("pricing_type")?,
        points_cost: row.try_get("points_cost")?,
        is_deleted: row.try_get("is_deleted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn download_from_row(row: &PgRow) -> Result<DownloadEvent> {
    Ok(DownloadEvent {
        download_id: row.try_get("download_id")?,
        downloader_id: row.try_get("user_id")?,
        resource_id: row.try_get("resource_id")?,
        earnings_awarded: row.try_get("earnings_awarded")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn earnings_from_row(row: &PgRow) -> Result<EarningsRecord> {
    let source: String = row.try_get("earnings_source")?;
    let status: String = row.try_get("status")?;

    Ok(EarningsRecord {
        earning_id: row.try_get("earning_id")?,
        resource_id: row.try_get("resource_id")?,
        uploader_id: row.try_get("uploader_id")?,
        downloader_id: row.try_get("downloader_id")?,
        download_id: row.try_get("download_id")?,
        pricing_type: row.try_get("pricing_type")?,
        points_cost: row.try_get("points_cost")?,
        earnings_points: row.try_get("earnings_points")?,
        earnings_source: EarningsSource::parse(&source).ok_or_else(|| {
            DatabaseError::InvalidData(format!("unknown earnings source: {}", source))
        })?,
        status: EarningsStatus::parse(&status)
            .ok_or_else(|| DatabaseError::InvalidData(format!("unknown earnings status: {}", status)))?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn points_record_from_row(row: &PgRow) -> Result<PointsRecord> {
    Ok(PointsRecord {
        record_id: row.try_get("record_id")?,
        user_id: row.try_get("user_id")?,
        points_change: row.try_get("points_change")?,
        points_balance: row.try_get("points_balance")?,
        change_type: row.try_get("change_type")?,
        source: row.try_get("source")?,
        source_id: row.try_get("source_id")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn pricing_log_from_row(row: &PgRow) -> Result<PricingChangeLog> {
    let operator_type: String = row.try_get("operator_type")?;

    Ok(PricingChangeLog {
        log_id: row.try_get("log_id")?,
        resource_id: row.try_get("resource_id")?,
        operator_id: row.try_get("operator_id")?,
        operator_type: OperatorType::parse(&operator_type).ok_or_else(|| {
            DatabaseError::InvalidData(format!("unknown operator type: {}", operator_type))
        })?,
        old_pricing_type: row.try_get("old_pricing_type")?,
        new_pricing_type: row.try_get("new_pricing_type")?,
        old_points_cost: row.try_get("old_points_cost")?,
        new_points_cost: row.try_get("new_points_cost")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn adjustment_from_row(row: &PgRow) -> Result<PointsAdjustmentLog> {
    let adjustment_type: String = row.try_get("adjustment_type")?;

    Ok(PointsAdjustmentLog {
        log_id: row.try_get("log_id")?,
        admin_id: row.try_get("admin_id")?,
        target_user_id: row.try_get("target_user_id")?,
        adjustment_type: AdjustmentType::parse(&adjustment_type).ok_or_else(|| {
            DatabaseError::InvalidData(format!("unknown adjustment type: {}", adjustment_type))
        })?,
        points_change: row.try_get("points_change")?,
        points_before: row.try_get("points_before")?,
        points_after: row.try_get("points_after")?,
        reason: row.try_get("reason")?,
        is_revoked: row.try_get("is_revoked")?,
        revoked_at: row.try_get("revoked_at")?,
        revoked_by: row.try_get("revoked_by")?,
        revoke_reason: row.try_get("revoke_reason")?,
        created_at: row.try_get("created_at")?,
    })
}

#[tracing::instrument(skip(pool))]
pub async fn load_user(pool: &PgPool, user_id: &str) -> Result<Option<UserAccount>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE user_id = $1", USER_COLUMNS))
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(DatabaseError::QueryError)?;

    row.as_ref().map(user_from_row).transpose()
}

#[tracing::instrument(skip(pool))]
pub async fn load_resource(pool: &PgPool, resource_id: &str) -> Result<Option<Resource>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM resources WHERE resource_id = $1",
        RESOURCE_COLUMNS
    ))
    .bind(resource_id)
    .fetch_optional(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    row.as_ref().map(resource_from_row).transpose()
}

#[tracing::instrument(skip(pool))]
pub async fn load_download(pool: &PgPool, download_id: &str) -> Result<Option<DownloadEvent>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM download_history WHERE download_id = $1",
        DOWNLOAD_COLUMNS
    ))
    .bind(download_id)
    .fetch_optional(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    row.as_ref().map(download_from_row).transpose()
}

#[tracing::instrument(skip(pool))]
pub async fn load_pricing_history(
    pool: &PgPool,
    resource_id: &str,
    page: PageRequest,
) -> Result<(Vec<PricingChangeLog>, i64)> {
    let rows = sqlx::query(
        r#"
        SELECT log_id, resource_id, operator_id, operator_type, old_pricing_type,
               new_pricing_type, old_points_cost, new_points_cost, reason, created_at
        FROM pricing_change_logs
        WHERE resource_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(resource_id)
    .bind(page.page_size)
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pricing_change_logs WHERE resource_id = $1")
            .bind(resource_id)
            .fetch_one(pool)
            .await
            .map_err(DatabaseError::QueryError)?;

    let logs = rows.iter().map(pricing_log_from_row).collect::<Result<Vec<_>>>()?;
    debug!("Loaded {} of {} pricing changes", logs.len(), total);
    Ok((logs, total))
}

#[tracing::instrument(skip(pool, query))]
pub async fn load_points_records(
    pool: &PgPool,
    user_id: &str,
    query: &PointsRecordQuery,
) -> Result<(Vec<PointsRecord>, i64)> {
    let page = query.page();
    let filter = r#"
        WHERE user_id = $1
          AND ($2::TEXT IS NULL OR change_type = $2)
          AND ($3::TIMESTAMPTZ IS NULL OR created_at >= $3)
          AND ($4::TIMESTAMPTZ IS NULL OR created_at <= $4)
    "#;

    let rows = sqlx::query(&format!(
        "SELECT record_id, user_id, points_change, points_balance, change_type, source, \
         source_id, description, created_at FROM points_records {} \
         ORDER BY created_at DESC LIMIT $5 OFFSET $6",
        filter
    ))
    .bind(user_id)
    .bind(query.change_type.as_deref())
    .bind(query.start_date)
    .bind(query.end_date)
    .bind(page.page_size)
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM points_records {}", filter))
        .bind(user_id)
        .bind(query.change_type.as_deref())
        .bind(query.start_date)
        .bind(query.end_date)
        .fetch_one(pool)
        .await
        .map_err(DatabaseError::QueryError)?;

    let records = rows.iter().map(points_record_from_row).collect::<Result<Vec<_>>>()?;
    Ok((records, total))
}

#[tracing::instrument(skip(pool))]
pub async fn load_earnings_by_download(
    pool: &PgPool,
    download_id: &str,
) -> Result<Option<EarningsRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM earnings_records WHERE download_id = $1",
        EARNINGS_COLUMNS
    ))
    .bind(download_id)
    .fetch_optional(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    row.as_ref().map(earnings_from_row).transpose()
}

#[tracing::instrument(skip(pool, query))]
pub async fn load_earnings_page(
    pool: &PgPool,
    uploader_id: &str,
    query: &EarningsQuery,
) -> Result<(Vec<EarningsRow>, i64)> {
    let page = query.page();
    let status = query.status.map(|s| s.as_str());
    let filter = r#"
        WHERE e.uploader_id = $1
          AND ($2::TEXT IS NULL OR e.status = $2)
          AND ($3::TIMESTAMPTZ IS NULL OR e.created_at >= $3)
          AND ($4::TIMESTAMPTZ IS NULL OR e.created_at <= $4)
    "#;

    let rows = sqlx::query(&format!(
        r#"
        SELECT e.earning_id, e.resource_id, e.uploader_id, e.downloader_id, e.download_id,
               e.pricing_type, e.points_cost, e.earnings_points, e.earnings_source, e.status,
               e.created_at, r.title AS resource_title, r.is_deleted AS resource_deleted
        FROM earnings_records e
        LEFT JOIN resources r ON r.resource_id = e.resource_id
        {}
        ORDER BY e.created_at DESC
        LIMIT $5 OFFSET $6
        "#,
        filter
    ))
    .bind(uploader_id)
    .bind(status)
    .bind(query.start_date)
    .bind(query.end_date)
    .bind(page.page_size)
    .bind(page.offset())
    .fetch_all(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM earnings_records e {}",
        filter
    ))
    .bind(uploader_id)
    .bind(status)
    .bind(query.start_date)
    .bind(query.end_date)
    .fetch_one(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    let earnings = rows
        .iter()
        .map(|row| -> Result<EarningsRow> {
            Ok(EarningsRow {
                record: earnings_from_row(row)?,
                resource_title: row.try_get("resource_title")?,
                resource_deleted: row.try_get("resource_deleted")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((earnings, total))
}

/// Sum and count of awarded earnings of an uploader
#[tracing::instrument(skip(pool))]
pub async fn load_awarded_totals(
    pool: &PgPool,
    uploader_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<(i64, i64)> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(earnings_points), 0)::BIGINT AS points,
               COUNT(*) AS downloads
        FROM earnings_records
        WHERE uploader_id = $1
          AND status = 'awarded'
          AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2)
        "#,
    )
    .bind(uploader_id)
    .bind(since)
    .fetch_one(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok((row.try_get("points")?, row.try_get("downloads")?))
}

#[tracing::instrument(skip(pool))]
pub async fn load_adjustment(pool: &PgPool, log_id: Uuid) -> Result<Option<PointsAdjustmentLog>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM points_adjustment_logs WHERE log_id = $1",
        ADJUSTMENT_COLUMNS
    ))
    .bind(log_id)
    .fetch_optional(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    row.as_ref().map(adjustment_from_row).transpose()
}
