use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PageRequest;

/// One of the six contiguous user level bands keyed on lifetime points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelBand {
    pub level: i16,
    pub name: &'static str,
    pub min_points: i64,
    /// Inclusive upper bound, `None` for the open-ended top band
    pub max_points: Option<i64>,
    discount_percent: i64,
    pub privileges: &'static [&'static str],
}

impl LevelBand {
    pub fn contains(&self, total_points: i64) -> bool {
        total_points >= self.min_points && self.max_points.map_or(true, |max| total_points <= max)
    }

    /// Download discount granted at this level (0.05 = 5%)
    pub fn discount(&self) -> Decimal {
        Decimal::new(self.discount_percent, 2)
    }
}

pub const LEVEL_BANDS: [LevelBand; 6] = [
    LevelBand {
        level: 1,
        name: "LV1 新手",
        min_points: 0,
        max_points: Some(499),
        discount_percent: 0,
        privileges: &["基础功能"],
    },
    LevelBand {
        level: 2,
        name: "LV2 初级",
        min_points: 500,
        max_points: Some(1999),
        discount_percent: 5,
        privileges: &["下载资源-5%积分消耗"],
    },
    LevelBand {
        level: 3,
        name: "LV3 中级",
        min_points: 2000,
        max_points: Some(4999),
        discount_percent: 10,
        privileges: &["下载资源-10%积分消耗", "专属等级徽章"],
    },
    LevelBand {
        level: 4,
        name: "LV4 高级",
        min_points: 5000,
        max_points: Some(9999),
        discount_percent: 15,
        privileges: &["下载资源-15%积分消耗", "作品优先展示"],
    },
    LevelBand {
        level: 5,
        name: "LV5 专家",
        min_points: 10000,
        max_points: Some(19999),
        discount_percent: 20,
        privileges: &["下载资源-20%积分消耗", "专属客服"],
    },
    LevelBand {
        level: 6,
        name: "LV6 大师",
        min_points: 20000,
        max_points: None,
        discount_percent: 30,
        privileges: &["下载资源-30%积分消耗", "所有特权"],
    },
];

/// Band containing `total_points`, LV1 when nothing matches
pub fn level_for_total(total_points: i64) -> &'static LevelBand {
    LEVEL_BANDS
        .iter()
        .find(|band| band.contains(total_points))
        .unwrap_or(&LEVEL_BANDS[0])
}

/// Points-related columns of a user row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub user_id: String,
    pub vip_level: i16,
    pub points_balance: i64,
    pub points_total: i64,
    pub user_level: i16,
}

impl UserAccount {
    pub fn is_vip(&self) -> bool {
        self.vip_level > 0
    }
}

/// Ledger line kinds written by this crate (`points_records.change_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Earn,
    Consume,
    Task,
    AdminAdd,
    AdminDeduct,
    AdminGift,
    AdminBatchGift,
    AdminRevoke,
    ClawbackShortfall,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Consume => "consume",
            Self::Task => "task",
            Self::AdminAdd => "admin_add",
            Self::AdminDeduct => "admin_deduct",
            Self::AdminGift => "admin_gift",
            Self::AdminBatchGift => "admin_batch_gift",
            Self::AdminRevoke => "admin_revoke",
            Self::ClawbackShortfall => "clawback_shortfall",
        }
    }
}

/// Attribution attached to every ledger mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsMeta {
    pub change_type: ChangeType,
    pub source: String,
    pub source_id: Option<String>,
    pub description: Option<String>,
}

impl PointsMeta {
    pub fn new(change_type: ChangeType, source: impl Into<String>) -> Self {
        Self {
            change_type,
            source: source.into(),
            source_id: None,
            description: None,
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A balance mutation handed to the store.
///
/// The store applies it only if `balance + delta >= 0`, and appends the
/// matching ledger line in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsChange {
    pub user_id: String,
    pub delta: i64,
    /// Whether a positive delta also raises `points_total` (and level)
    pub counts_toward_total: bool,
    pub meta: PointsMeta,
}

impl PointsChange {
    /// Post-change total; spending never lowers the lifetime total.
    /// `None` when the credit would overflow.
    pub fn next_total(&self, current_total: i64) -> Option<i64> {
        if self.counts_toward_total && self.delta > 0 {
            current_total.checked_add(self.delta)
        } else {
            Some(current_total)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub user_id: String,
    pub points_balance: i64,
    pub points_total: i64,
    pub user_level: i16,
    pub record_id: Uuid,
}

/// Append-only ledger line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsRecord {
    pub record_id: Uuid,
    pub user_id: String,
    pub points_change: i64,
    pub points_balance: i64,
    pub change_type: String,
    pub source: String,
    pub source_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointsRecordQuery {
    pub page_num: Option<i64>,
    pub page_size: Option<i64>,
    pub change_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl PointsRecordQuery {
    pub const DEFAULT_PAGE_SIZE: i64 = 20;

    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page_num, self.page_size, Self::DEFAULT_PAGE_SIZE)
    }

    pub fn matches(&self, record: &PointsRecord) -> bool {
        self.change_type
            .as_deref()
            .map_or(true, |kind| record.change_type == kind)
            && self.start_date.map_or(true, |start| record.created_at >= start)
            && self.end_date.map_or(true, |end| record.created_at <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPointsInfo {
    pub points_balance: i64,
    pub points_total: i64,
    pub user_level: i16,
    pub level_name: String,
    pub level_discount: Decimal,
    pub level_privileges: Vec<String>,
    /// Points still missing for the next level, `None` at the top level
    pub next_level_points: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    Add,
    Deduct,
    Gift,
    BatchGift,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Deduct => "deduct",
            Self::Gift => "gift",
            Self::BatchGift => "batch_gift",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(Self::Add),
            "deduct" => Some(Self::Deduct),
            "gift" => Some(Self::Gift),
            "batch_gift" => Some(Self::BatchGift),
            _ => None,
        }
    }

    pub fn change_type(&self) -> ChangeType {
        match self {
            Self::Add => ChangeType::AdminAdd,
            Self::Deduct => ChangeType::AdminDeduct,
            Self::Gift => ChangeType::AdminGift,
            Self::BatchGift => ChangeType::AdminBatchGift,
        }
    }
}

/// Admin adjustment audit row (`points_adjustment_logs`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsAdjustmentLog {
    pub log_id: Uuid,
    pub admin_id: String,
    pub target_user_id: String,
    pub adjustment_type: AdjustmentType,
    pub points_change: i64,
    pub points_before: i64,
    pub points_after: i64,
    pub reason: String,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub revoke_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
