use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EarningsPolicy;
use crate::db::{AwardOutcome, CancelOutcome, LedgerStore};
use crate::domain::DomainError;
use crate::models::{
    BalanceSnapshot, ChangeType, DownloaderType, EarningItem, EarningsQuery, EarningsRecord,
    EarningsSource, EarningsStats, EarningsStatus, NewEarnings, Page, PointsChange, PointsMeta,
    Pricing,
};

/// Amount, attribution and display text of one award
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsCalculation {
    pub earnings_points: i64,
    pub earnings_source: EarningsSource,
    pub description: String,
}

/// Earnings an uploader receives for one download.
///
/// | pricing     | downloader | points          | source           |
/// |-------------|------------|-----------------|------------------|
/// | Free        | normal     | free reward     | normal_download  |
/// | Free        | VIP        | free reward     | vip_download     |
/// | PaidPoints  | normal     | paid share      | normal_download  |
/// | PaidPoints  | VIP        | paid share      | platform_subsidy |
/// | VipOnly     | any        | VIP-only reward | platform_subsidy |
pub fn calculate_earnings(pricing: Pricing, is_vip: bool, policy: &EarningsPolicy) -> EarningsCalculation {
    match pricing {
        Pricing::Free => EarningsCalculation {
            earnings_points: policy.free_reward,
            earnings_source: if is_vip {
                EarningsSource::VipDownload
            } else {
                EarningsSource::NormalDownload
            },
            description: "免费资源下载收益".to_string(),
        },
        Pricing::PaidPoints(cost) => {
            let points = policy.paid_share.apply(i64::from(cost));
            if is_vip {
                EarningsCalculation {
                    earnings_points: points,
                    earnings_source: EarningsSource::PlatformSubsidy,
                    description: format!("VIP用户下载付费资源，平台补贴{}积分给上传者", points),
                }
            } else {
                EarningsCalculation {
                    earnings_points: points,
                    earnings_source: EarningsSource::NormalDownload,
                    description: format!("付费资源下载收益{}积分", points),
                }
            }
        }
        Pricing::VipOnly => EarningsCalculation {
            earnings_points: policy.vip_only_reward,
            earnings_source: EarningsSource::PlatformSubsidy,
            description: "VIP专属资源下载收益（平台补贴）".to_string(),
        },
    }
}

/// Same as [`calculate_earnings`] for raw persisted columns.
/// Unknown pricing codes earn the free reward as a normal download.
pub fn calculate_earnings_for_code(
    pricing_type: i16,
    points_cost: i32,
    is_vip: bool,
    policy: &EarningsPolicy,
) -> EarningsCalculation {
    match Pricing::from_parts(pricing_type, points_cost) {
        Some(pricing) => calculate_earnings(pricing, is_vip, policy),
        None => EarningsCalculation {
            earnings_points: policy.free_reward,
            earnings_source: EarningsSource::NormalDownload,
            description: "资源下载收益".to_string(),
        },
    }
}

/// A committed award
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsAward {
    pub earning_id: Uuid,
    pub earnings_points: i64,
    pub earnings_source: EarningsSource,
    pub uploader_id: String,
    pub balance: BalanceSnapshot,
}

/// Flat wire shape of an award attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earning_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earnings_points: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<Result<EarningsAward, DomainError>> for EarningsResult {
    fn from(result: Result<EarningsAward, DomainError>) -> Self {
        match result {
            Ok(award) => Self {
                success: true,
                earning_id: Some(award.earning_id),
                earnings_points: Some(award.earnings_points),
                error_code: None,
                error_message: None,
            },
            Err(e) => Self {
                success: false,
                earning_id: None,
                earnings_points: None,
                error_code: Some(e.code().to_string()),
                error_message: Some(e.to_string()),
            },
        }
    }
}

/// Award the uploader of a downloaded resource.
///
/// The earnings record, the download flag and the uploader credit commit
/// together, so repeated or concurrent calls for one download credit at
/// most once. Persistence failures surface as `AWARD_FAILED`.
#[tracing::instrument(skip(store, policy))]
pub async fn award_earnings<S>(
    store: &S,
    download_id: &str,
    policy: &EarningsPolicy,
) -> Result<EarningsAward, DomainError>
where
    S: LedgerStore + ?Sized,
{
    match try_award(store, download_id, policy).await {
        Err(DomainError::Database(e)) => {
            error!(error = %e, "Failed to award earnings");
            Err(DomainError::AwardFailed(e.to_string()))
        }
        other => other,
    }
}

async fn try_award<S>(
    store: &S,
    download_id: &str,
    policy: &EarningsPolicy,
) -> Result<EarningsAward, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let download = store
        .get_download(download_id)
        .await?
        .ok_or_else(|| DomainError::DownloadNotFound(download_id.to_string()))?;
    if download.earnings_awarded {
        return Err(DomainError::DuplicateEarnings(download_id.to_string()));
    }

    let resource_id = download
        .resource_id
        .clone()
        .ok_or_else(|| DomainError::ResourceNotFound(format!("download {}", download_id)))?;
    let resource = store
        .get_resource(&resource_id)
        .await?
        .ok_or_else(|| DomainError::ResourceNotFound(resource_id.clone()))?;

    let uploader_id = resource
        .uploader_id
        .clone()
        .ok_or_else(|| DomainError::AwardFailed(format!("资源{}没有上传者", resource_id)))?;
    let downloader_id = download.downloader_id.clone().unwrap_or_default();
    if downloader_id == uploader_id {
        info!(uploader_id = %uploader_id, "Self download, no earnings");
        return Err(DomainError::SelfDownload);
    }

    let is_vip = match store.get_user(&downloader_id).await? {
        Some(downloader) => downloader.is_vip(),
        None => false,
    };
    let calculation =
        calculate_earnings_for_code(resource.pricing_type, resource.points_cost, is_vip, policy);
    // An award only ever credits the uploader
    if calculation.earnings_points <= 0 {
        warn!(
            earnings_points = calculation.earnings_points,
            "Calculated earnings are not positive"
        );
        return Err(DomainError::AwardFailed(format!(
            "收益积分必须为正数: {}",
            calculation.earnings_points
        )));
    }

    let award = NewEarnings {
        earning_id: Uuid::new_v4(),
        resource_id: resource_id.clone(),
        uploader_id: uploader_id.clone(),
        downloader_id,
        download_id: download_id.to_string(),
        pricing_type: resource.pricing_type,
        points_cost: resource.points_cost,
        earnings_points: calculation.earnings_points,
        earnings_source: calculation.earnings_source,
        downloader_type: if is_vip {
            DownloaderType::Vip
        } else {
            DownloaderType::Normal
        },
    };
    let credit = PointsChange {
        user_id: uploader_id.clone(),
        delta: calculation.earnings_points,
        counts_toward_total: true,
        meta: PointsMeta::new(ChangeType::Earn, "work_downloaded")
            .with_source_id(download_id)
            .with_description(format!(
                "作品「{}」被下载，获得{}积分",
                resource.title, calculation.earnings_points
            )),
    };

    match store.record_award(award, credit).await? {
        AwardOutcome::Recorded { record, balance } => {
            info!(
                earning_id = %record.earning_id,
                uploader_id = %record.uploader_id,
                earnings_points = record.earnings_points,
                earnings_source = record.earnings_source.as_str(),
                "Earnings awarded"
            );
            Ok(EarningsAward {
                earning_id: record.earning_id,
                earnings_points: record.earnings_points,
                earnings_source: record.earnings_source,
                uploader_id: record.uploader_id,
                balance,
            })
        }
        AwardOutcome::DownloadNotFound => Err(DomainError::DownloadNotFound(download_id.to_string())),
        AwardOutcome::AlreadyAwarded => Err(DomainError::DuplicateEarnings(download_id.to_string())),
        AwardOutcome::UploaderNotFound => {
            Err(DomainError::AwardFailed(format!("上传者{}不存在", uploader_id)))
        }
    }
}

/// Freeze the pending and awarded earnings of a resource.
/// Credited balances are left alone. Returns the number of records frozen.
#[tracing::instrument(skip(store))]
pub async fn freeze_earnings<S>(store: &S, resource_id: &str, reason: &str) -> Result<u64, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let frozen = store
        .transition_earnings(
            resource_id,
            &[EarningsStatus::Pending, EarningsStatus::Awarded],
            EarningsStatus::Frozen,
        )
        .await?;

    if frozen == 0 {
        info!("No earnings to freeze");
    } else {
        info!(frozen, "Earnings frozen");
    }
    Ok(frozen)
}

#[tracing::instrument(skip(store))]
pub async fn unfreeze_earnings<S>(
    store: &S,
    resource_id: &str,
    reviewer_id: &str,
) -> Result<u64, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let restored = store
        .transition_earnings(resource_id, &[EarningsStatus::Frozen], EarningsStatus::Awarded)
        .await?;

    if restored == 0 {
        info!("No frozen earnings to restore");
    } else {
        info!(restored, "Earnings unfrozen");
    }
    Ok(restored)
}

/// Cancel the frozen earnings of a resource and claw the points back from
/// its uploader. The balance is clamped at zero; any unrecovered part is
/// reported as `shortfall` and noted in the uploader's ledger.
#[tracing::instrument(skip(store))]
pub async fn cancel_earnings<S>(
    store: &S,
    resource_id: &str,
    reason: &str,
) -> Result<CancelOutcome, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let outcome = store.cancel_frozen_earnings(resource_id, reason).await?;

    if outcome.cancelled == 0 {
        info!("No frozen earnings to cancel");
    } else if outcome.shortfall > 0 {
        warn!(
            cancelled = outcome.cancelled,
            total_points = outcome.total_points,
            clawed_back = outcome.clawed_back,
            shortfall = outcome.shortfall,
            "Clawback clamped at zero balance"
        );
    } else {
        info!(
            cancelled = outcome.cancelled,
            total_points = outcome.total_points,
            "Earnings cancelled"
        );
    }
    Ok(outcome)
}

pub async fn get_earnings_history<S>(
    store: &S,
    uploader_id: &str,
    query: &EarningsQuery,
) -> Result<Page<EarningItem>, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let page = query.page();
    let (rows, total) = store.earnings_page(uploader_id, query).await?;
    Ok(Page::new(rows.into_iter().map(EarningItem::from).collect(), total, page))
}

pub async fn get_earnings_stats<S>(store: &S, uploader_id: &str) -> Result<EarningsStats, DomainError>
where
    S: LedgerStore + ?Sized,
{
    earnings_stats_at(store, uploader_id, Utc::now()).await
}

/// Stats with the current month taken from `now` (UTC)
pub async fn earnings_stats_at<S>(
    store: &S,
    uploader_id: &str,
    now: DateTime<Utc>,
) -> Result<EarningsStats, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let month_start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);

    let (total_earnings, total_downloads) = store.awarded_totals(uploader_id, None).await?;
    let (month_earnings, month_downloads) =
        store.awarded_totals(uploader_id, Some(month_start)).await?;

    Ok(EarningsStats {
        total_earnings,
        month_earnings,
        total_downloads,
        month_downloads,
    })
}

pub async fn get_earnings_by_download<S>(
    store: &S,
    download_id: &str,
) -> Result<Option<EarningsRecord>, DomainError>
where
    S: LedgerStore + ?Sized,
{
    Ok(store.earnings_by_download(download_id).await?)
}

/// Whether the download is flagged as awarded; false for unknown downloads
pub async fn has_earnings_awarded<S>(store: &S, download_id: &str) -> Result<bool, DomainError>
where
    S: LedgerStore + ?Sized,
{
    Ok(store
        .get_download(download_id)
        .await?
        .map_or(false, |download| download.earnings_awarded))
}
