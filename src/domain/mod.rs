// Domain layer - ledger business rules on top of the LedgerStore boundary.
// Every operation reports failures through DomainError.

pub mod adjustments;
pub mod earnings;
pub mod points;
pub mod pricing;

use crate::db::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("无效的定价类型: {0}")]
    InvalidPricingType(i16),

    #[error("{message}")]
    InvalidPointsCost {
        code: pricing::PointsErrorCode,
        message: String,
    },

    #[error("资源不存在")]
    ResourceNotFound(String),

    #[error("资源已被删除")]
    ResourceAlreadyDeleted(String),

    #[error("下载记录不存在")]
    DownloadNotFound(String),

    #[error("该下载已发放过收益")]
    DuplicateEarnings(String),

    #[error("下载自己的资源不产生收益")]
    SelfDownload,

    #[error("用户不存在")]
    UserNotFound(String),

    #[error("积分不足，当前余额{balance}，需要{required}")]
    InsufficientPoints { balance: i64, required: i64 },

    #[error("调整后积分余额不能为负数")]
    NegativeBalance { balance: i64, change: i64 },

    #[error("无效的积分变动值: {0}")]
    InvalidPoints(i64),

    #[error("{0}")]
    InvalidReason(String),

    #[error("单次调整积分不能超过{limit}")]
    ExceedLimit { points: i64, limit: i64 },

    #[error("调整记录不存在")]
    LogNotFound(String),

    #[error("该调整已被撤销")]
    AlreadyRevoked(String),

    #[error("已超过调整撤销时限")]
    RevokeWindowExpired(String),

    #[error("无法撤销：用户已消耗部分积分，当前余额{balance}不足以撤销{required}积分")]
    PointsConsumed { balance: i64, required: i64 },

    #[error("收益发放失败: {0}")]
    AwardFailed(String),

    #[error("数据库错误: {0}")]
    Database(#[from] DatabaseError),
}

impl DomainError {
    /// Machine-readable code callers branch on
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPricingType(_) => "INVALID_PRICING_TYPE",
            Self::InvalidPointsCost { code, .. } => code.as_str(),
            Self::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            Self::ResourceAlreadyDeleted(_) => "RESOURCE_ALREADY_DELETED",
            Self::DownloadNotFound(_) => "DOWNLOAD_NOT_FOUND",
            Self::DuplicateEarnings(_) => "DUPLICATE_EARNINGS",
            Self::SelfDownload => "SELF_DOWNLOAD",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            Self::NegativeBalance { .. } => "NEGATIVE_BALANCE",
            Self::InvalidPoints(_) => "INVALID_POINTS",
            Self::InvalidReason(_) => "INVALID_REASON",
            Self::ExceedLimit { .. } => "EXCEED_LIMIT",
            Self::LogNotFound(_) => "LOG_NOT_FOUND",
            Self::AlreadyRevoked(_) => "ALREADY_REVOKED",
            Self::RevokeWindowExpired(_) => "REVOKE_WINDOW_EXPIRED",
            Self::PointsConsumed { .. } => "POINTS_CONSUMED",
            Self::AwardFailed(_) => "AWARD_FAILED",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }
}

pub use adjustments::{
    apply_adjustment, batch_gift_points, get_adjustment, requires_approval, revoke_adjustment,
    validate_reason, AdminAdjustment, BatchGiftResult,
};
pub use earnings::{
    award_earnings, calculate_earnings, calculate_earnings_for_code, cancel_earnings,
    freeze_earnings, get_earnings_by_download, get_earnings_history, get_earnings_stats,
    has_earnings_awarded, unfreeze_earnings, EarningsAward, EarningsCalculation, EarningsResult,
};
pub use points::{
    add_points, adjust_user_points, calculate_user_level, deduct_points, get_points_records,
    get_user_points_info, next_level_points,
};
pub use pricing::{
    get_pricing_history, get_pricing_info, pricing_label, set_batch_pricing, set_pricing,
    snap_to_nearest_five, soft_delete_resource, validate_points_cost, validate_points_input,
    BatchPricingResult, PointsErrorCode, PointsValidation, SetPricing,
};
