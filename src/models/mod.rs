pub mod earnings;
pub mod points;
pub mod pricing;


use serde::{Deserialize, Serialize};

pub use earnings::*;
pub use points::*;
pub use pricing::*;

/// Normalized pagination window shared by all paginated reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_num: i64,
    pub page_size: i64,
}

impl PageRequest {
    pub const MAX_PAGE_SIZE: i64 = 100;

    /// Missing or non-positive page numbers fall back to the first page,
    /// page sizes are clamped to `1..=MAX_PAGE_SIZE`
    pub fn new(page_num: Option<i64>, page_size: Option<i64>, default_size: i64) -> Self {
        Self {
            page_num: page_num.unwrap_or(1).max(1),
            page_size: page_size.unwrap_or(default_size).clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    /// Rows to skip; saturates for absurdly large page numbers
    pub fn offset(&self) -> i64 {
        self.page_num.saturating_sub(1).saturating_mul(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub list: Vec<T>,
    pub total: i64,
    pub page_num: i64,
    pub page_size: i64,
}

impl<T> Page<T> {
    pub fn new(list: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            list,
            total,
            page_num: request.page_num,
            page_size: request.page_size,
        }
    }
}
