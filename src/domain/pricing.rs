use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{LedgerStore, PricingUpdate, SoftDeleteOutcome};
use crate::domain::DomainError;
use crate::models::{
    OperatorType, Page, PageRequest, Pricing, PricingChangeLog, PricingInfo, PricingType,
    MAX_POINTS_COST, MIN_POINTS_COST, POINTS_COST_STEP,
};

pub const DEFAULT_HISTORY_PAGE_SIZE: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointsErrorCode {
    InvalidPointsType,
    PointsTooLow,
    PointsTooHigh,
    InvalidPointsStep,
}

impl PointsErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPointsType => "INVALID_POINTS_TYPE",
            Self::PointsTooLow => "POINTS_TOO_LOW",
            Self::PointsTooHigh => "POINTS_TOO_HIGH",
            Self::InvalidPointsStep => "INVALID_POINTS_STEP",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidPointsType => "积分值必须是数字",
            Self::PointsTooLow => "积分不能低于5分",
            Self::PointsTooHigh => "积分不能超过100分",
            Self::InvalidPointsStep => "积分需为5的倍数",
        }
    }
}

/// Outcome of a points cost check.
///
/// An invalid result usually carries `adjusted_value`, the closest legal
/// cost, which callers may substitute instead of rejecting the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<PointsErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjusted_value: Option<i64>,
}

impl PointsValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error_code: None,
            error_message: None,
            adjusted_value: None,
        }
    }

    fn invalid(code: PointsErrorCode, adjusted_value: Option<i64>) -> Self {
        Self {
            valid: false,
            error_code: Some(code),
            error_message: Some(code.message().to_string()),
            adjusted_value,
        }
    }
}

// Rounds halves up. The step count is clamped before
// scaling so extreme inputs cannot overflow.
fn snap_value(points: f64) -> i64 {
    let step = POINTS_COST_STEP as f64;
    let min_steps = (MIN_POINTS_COST / POINTS_COST_STEP) as f64;
    let max_steps = (MAX_POINTS_COST / POINTS_COST_STEP) as f64;

    let steps = ((points / step) + 0.5).floor().clamp(min_steps, max_steps);
    steps as i64 * POINTS_COST_STEP
}

fn validate_value(points: f64) -> PointsValidation {
    if !points.is_finite() {
        return PointsValidation::invalid(PointsErrorCode::InvalidPointsType, None);
    }
    if points < MIN_POINTS_COST as f64 {
        return PointsValidation::invalid(PointsErrorCode::PointsTooLow, Some(MIN_POINTS_COST));
    }
    if points > MAX_POINTS_COST as f64 {
        return PointsValidation::invalid(PointsErrorCode::PointsTooHigh, Some(MAX_POINTS_COST));
    }
    if points % POINTS_COST_STEP as f64 != 0.0 {
        return PointsValidation::invalid(
            PointsErrorCode::InvalidPointsStep,
            Some(snap_value(points)),
        );
    }
    PointsValidation::ok()
}

/// Check a points cost against the 5..=100, step 5 rule
pub fn validate_points_cost(points: i64) -> PointsValidation {
    validate_value(points as f64)
}

/// Validate free-form input such as a form field or CLI argument
pub fn validate_points_input(input: &str) -> PointsValidation {
    match input.trim().parse::<f64>() {
        Ok(points) => validate_value(points),
        Err(_) => PointsValidation::invalid(PointsErrorCode::InvalidPointsType, None),
    }
}

/// Nearest multiple of 5 within 5..=100
pub fn snap_to_nearest_five(points: i64) -> i64 {
    snap_value(points as f64)
}

/// Display label for persisted pricing columns
pub fn pricing_label(pricing_type: i16, points_cost: i32) -> String {
    Pricing::from_parts(pricing_type, points_cost)
        .map(|pricing| pricing.label())
        .unwrap_or_else(|| "未知".to_string())
}

/// A pricing change requested by an uploader or an auditor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPricing {
    pub resource_id: String,
    pub pricing_type: i16,
    pub points_cost: i64,
    pub operator_id: String,
    pub operator_type: OperatorType,
    pub reason: Option<String>,
}

impl SetPricing {
    pub fn for_resource(&self, resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            ..self.clone()
        }
    }
}

/// Resolve the requested type/cost into a storable pricing.
/// Paid costs outside the rules are replaced by their adjusted value.
fn resolve_pricing(pricing_type: i16, points_cost: i64) -> Result<Pricing, DomainError> {
    let kind = PricingType::from_code(pricing_type)
        .ok_or(DomainError::InvalidPricingType(pricing_type))?;

    Ok(match kind {
        PricingType::Free => Pricing::Free,
        PricingType::VipOnly => Pricing::VipOnly,
        PricingType::PaidPoints => {
            let validation = validate_points_cost(points_cost);
            let cost = match (validation.valid, validation.adjusted_value, validation.error_code) {
                (true, _, _) => points_cost,
                (false, Some(adjusted), _) => adjusted,
                (false, None, code) => {
                    let code = code.unwrap_or(PointsErrorCode::InvalidPointsType);
                    return Err(DomainError::InvalidPointsCost {
                        code,
                        message: code.message().to_string(),
                    });
                }
            };
            Pricing::PaidPoints(cost as i32)
        }
    })
}

/// Set a resource's pricing and write the change log in one transaction
#[tracing::instrument(skip(store, request), fields(resource_id = %request.resource_id))]
pub async fn set_pricing<S>(store: &S, request: SetPricing) -> Result<PricingChangeLog, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let pricing = resolve_pricing(request.pricing_type, request.points_cost)?;
    if matches!(pricing, Pricing::PaidPoints(cost) if cost as i64 != request.points_cost) {
        info!(
            requested = request.points_cost,
            adjusted = pricing.points_cost(),
            "Adjusted points cost to the nearest valid value"
        );
    }

    let log = store
        .update_pricing(PricingUpdate {
            resource_id: request.resource_id.clone(),
            pricing,
            operator_id: request.operator_id,
            operator_type: request.operator_type,
            reason: request.reason,
        })
        .await?
        .ok_or_else(|| DomainError::ResourceNotFound(request.resource_id.clone()))?;

    info!(
        old_pricing_type = log.old_pricing_type,
        new_pricing_type = log.new_pricing_type,
        old_points_cost = log.old_points_cost,
        new_points_cost = log.new_points_cost,
        "Pricing updated"
    );
    Ok(log)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPricingError {
    pub resource_id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPricingResult {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<BatchPricingError>,
}

/// Apply `template` to every resource, continuing past failures.
/// The template's own `resource_id` is ignored.
#[tracing::instrument(skip(store, template), fields(count = resource_ids.len()))]
pub async fn set_batch_pricing<S>(
    store: &S,
    resource_ids: &[String],
    template: &SetPricing,
) -> BatchPricingResult
where
    S: LedgerStore + ?Sized,
{
    let mut result = BatchPricingResult::default();

    for resource_id in resource_ids {
        match set_pricing(store, template.for_resource(resource_id.as_str())).await {
            Ok(_) => result.success += 1,
            Err(e) => {
                warn!(resource_id = %resource_id, error = %e, "Batch pricing item failed");
                result.failed += 1;
                result.errors.push(BatchPricingError {
                    resource_id: resource_id.clone(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(success = result.success, failed = result.failed, "Batch pricing finished");
    result
}

pub async fn get_pricing_info<S>(store: &S, resource_id: &str) -> Result<PricingInfo, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let resource = store
        .get_resource(resource_id)
        .await?
        .ok_or_else(|| DomainError::ResourceNotFound(resource_id.to_string()))?;

    Ok(PricingInfo {
        pricing_label: pricing_label(resource.pricing_type, resource.points_cost),
        resource_id: resource.resource_id,
        pricing_type: resource.pricing_type,
        points_cost: resource.points_cost,
    })
}

/// Pricing changes of a resource, newest first
pub async fn get_pricing_history<S>(
    store: &S,
    resource_id: &str,
    page_num: Option<i64>,
    page_size: Option<i64>,
) -> Result<Page<PricingChangeLog>, DomainError>
where
    S: LedgerStore + ?Sized,
{
    let page = PageRequest::new(page_num, page_size, DEFAULT_HISTORY_PAGE_SIZE);
    let (logs, total) = store.pricing_history(resource_id, page).await?;
    Ok(Page::new(logs, total, page))
}

/// Hide a resource. Its earnings records stay untouched.
#[tracing::instrument(skip(store))]
pub async fn soft_delete_resource<S>(store: &S, resource_id: &str) -> Result<(), DomainError>
where
    S: LedgerStore + ?Sized,
{
    match store.soft_delete_resource(resource_id).await? {
        SoftDeleteOutcome::Deleted => {
            info!("Resource soft deleted");
            Ok(())
        }
        SoftDeleteOutcome::AlreadyDeleted => {
            Err(DomainError::ResourceAlreadyDeleted(resource_id.to_string()))
        }
        SoftDeleteOutcome::NotFound => Err(DomainError::ResourceNotFound(resource_id.to_string())),
    }
}
