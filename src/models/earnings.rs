use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PageRequest;

/// Who funds an uploader's earnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningsSource {
    NormalDownload,
    VipDownload,
    PlatformSubsidy,
}

impl EarningsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NormalDownload => "normal_download",
            Self::VipDownload => "vip_download",
            Self::PlatformSubsidy => "platform_subsidy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "normal_download" => Some(Self::NormalDownload),
            "vip_download" => Some(Self::VipDownload),
            "platform_subsidy" => Some(Self::PlatformSubsidy),
            _ => None,
        }
    }
}

/// Lifecycle of an earnings record.
///
/// `Pending` is reserved for a pre-authorization flow; awards are created
/// directly as `Awarded`. `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningsStatus {
    Pending,
    Awarded,
    Frozen,
    Cancelled,
}

impl EarningsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Awarded => "awarded",
            Self::Frozen => "frozen",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "awarded" => Some(Self::Awarded),
            "frozen" => Some(Self::Frozen),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: EarningsStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Frozen)
                | (Self::Awarded, Self::Frozen)
                | (Self::Frozen, Self::Awarded)
                | (Self::Frozen, Self::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloaderType {
    Normal,
    Vip,
}

impl DownloaderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Vip => "vip",
        }
    }
}

/// Completed download as recorded in `download_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEvent {
    pub download_id: String,
    pub downloader_id: Option<String>,
    pub resource_id: Option<String>,
    pub earnings_awarded: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsRecord {
    pub earning_id: Uuid,
    pub resource_id: String,
    pub uploader_id: String,
    pub downloader_id: String,
    pub download_id: String,
    pub pricing_type: i16,
    pub points_cost: i32,
    pub earnings_points: i64,
    pub earnings_source: EarningsSource,
    pub status: EarningsStatus,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to persist one award
#[derive(Debug, Clone, PartialEq)]
pub struct NewEarnings {
    pub earning_id: Uuid,
    pub resource_id: String,
    pub uploader_id: String,
    pub downloader_id: String,
    pub download_id: String,
    pub pricing_type: i16,
    pub points_cost: i32,
    pub earnings_points: i64,
    pub earnings_source: EarningsSource,
    pub downloader_type: DownloaderType,
}

/// Earnings record joined with the display fields of its resource
#[derive(Debug, Clone, PartialEq)]
pub struct EarningsRow {
    pub record: EarningsRecord,
    pub resource_title: Option<String>,
    pub resource_deleted: Option<bool>,
}

/// One line of an uploader's earnings history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningItem {
    pub earning_id: Uuid,
    pub resource_id: String,
    pub resource_title: String,
    pub resource_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
    pub download_time: DateTime<Utc>,
    pub downloader_type: DownloaderType,
    pub earnings_points: i64,
    pub status: EarningsStatus,
}

impl From<EarningsRow> for EarningItem {
    fn from(row: EarningsRow) -> Self {
        let record = row.record;
        let resource_deleted = row.resource_deleted.unwrap_or(false);
        let resource_url = if resource_deleted {
            None
        } else {
            Some(format!("/resource/{}", record.resource_id))
        };
        let downloader_type = match record.earnings_source {
            EarningsSource::VipDownload | EarningsSource::PlatformSubsidy => DownloaderType::Vip,
            EarningsSource::NormalDownload => DownloaderType::Normal,
        };

        Self {
            earning_id: record.earning_id,
            resource_title: row.resource_title.unwrap_or_else(|| "未知资源".to_string()),
            resource_id: record.resource_id,
            resource_deleted,
            resource_url,
            download_time: record.created_at,
            downloader_type,
            earnings_points: record.earnings_points,
            status: record.status,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsStats {
    pub total_earnings: i64,
    pub month_earnings: i64,
    pub total_downloads: i64,
    pub month_downloads: i64,
}

/// Filters for an uploader's earnings history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EarningsQuery {
    pub page_num: Option<i64>,
    pub page_size: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: Option<EarningsStatus>,
}

impl EarningsQuery {
    pub const DEFAULT_PAGE_SIZE: i64 = 20;

    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page_num, self.page_size, Self::DEFAULT_PAGE_SIZE)
    }

    pub fn matches(&self, record: &EarningsRecord) -> bool {
        self.status.map_or(true, |status| record.status == status)
            && self.start_date.map_or(true, |start| record.created_at >= start)
            && self.end_date.map_or(true, |end| record.created_at <= end)
    }
}
