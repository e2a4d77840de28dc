use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_POINTS_COST: i64 = 5;
pub const MAX_POINTS_COST: i64 = 100;
pub const POINTS_COST_STEP: i64 = 5;

/// Persisted pricing classification (`resources.pricing_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PricingType {
    Free,       // 0
    PaidPoints, // 1
    VipOnly,    // 2
}

impl PricingType {
    pub fn code(self) -> i16 {
        match self {
            Self::Free => 0,
            Self::PaidPoints => 1,
            Self::VipOnly => 2,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Free),
            1 => Some(Self::PaidPoints),
            2 => Some(Self::VipOnly),
            _ => None,
        }
    }
}

/// Price of a resource. Only `PaidPoints` carries a cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pricingType", content = "pointsCost", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pricing {
    Free,
    PaidPoints(i32),
    VipOnly,
}

impl Pricing {
    /// Rebuild pricing from its persisted columns. The stored cost is
    /// ignored for anything but `PaidPoints`.
    pub fn from_parts(pricing_type: i16, points_cost: i32) -> Option<Self> {
        PricingType::from_code(pricing_type).map(|kind| match kind {
            PricingType::Free => Self::Free,
            PricingType::PaidPoints => Self::PaidPoints(points_cost),
            PricingType::VipOnly => Self::VipOnly,
        })
    }

    pub fn pricing_type(&self) -> PricingType {
        match self {
            Self::Free => PricingType::Free,
            Self::PaidPoints(_) => PricingType::PaidPoints,
            Self::VipOnly => PricingType::VipOnly,
        }
    }

    /// Cost column value; 0 for free and VIP-only resources
    pub fn points_cost(&self) -> i32 {
        match self {
            Self::PaidPoints(cost) => *cost,
            Self::Free | Self::VipOnly => 0,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Free => "免费".to_string(),
            Self::PaidPoints(cost) => format!("{}积分", cost),
            Self::VipOnly => "VIP专属".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorType {
    Uploader,
    Auditor,
}

impl OperatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploader => "uploader",
            Self::Auditor => "auditor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uploader" => Some(Self::Uploader),
            "auditor" => Some(Self::Auditor),
            _ => None,
        }
    }
}

/// Resource row as far as the ledger cares about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_id: String,
    pub uploader_id: Option<String>,
    pub title: String,
    pub pricing_type: i16,
    pub points_cost: i32,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn pricing(&self) -> Option<Pricing> {
        Pricing::from_parts(self.pricing_type, self.points_cost)
    }
}

/// Immutable audit row written with every pricing mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingChangeLog {
    pub log_id: Uuid,
    pub resource_id: String,
    pub operator_id: String,
    pub operator_type: OperatorType,
    pub old_pricing_type: i16,
    pub new_pricing_type: i16,
    pub old_points_cost: i32,
    pub new_points_cost: i32,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingInfo {
    pub resource_id: String,
    pub pricing_type: i16,
    pub points_cost: i32,
    pub pricing_label: String,
}
