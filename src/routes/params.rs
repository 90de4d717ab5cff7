use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

pub const MAX_PER_PAGE: i64 = 100;
/// Offsets stay well inside `i64` (and Postgres `BIGINT`) at this cap.
pub const MAX_PAGE: i64 = 1_000_000;

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
        }
    }

    /// Returns `(page, per_page, offset)` with `per_page` defaulting to `default_per_page`.
    pub fn normalize(&self, default_per_page: i64) -> (i64, i64, i64) {
        normalize(self.page, self.per_page, default_per_page)
    }
}

fn normalize(page: Option<i64>, per_page: Option<i64>, default_per_page: i64) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
    let per_page = per_page.unwrap_or(default_per_page).clamp(1, MAX_PER_PAGE);
    let offset = (page - 1) * per_page;
    (page, per_page, offset)
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductSortBy {
    CreatedAt,
    Price,
    Name,
}

// Query strings are flat: `serde(flatten)` would hand numbers to the inner
// struct as strings, so page fields are repeated here.
#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    /// Category id.
    pub category: Option<uuid::Uuid>,
    /// Case-insensitive match on name or description.
    pub search: Option<String>,
    /// Minimum price in cents.
    pub min_price: Option<i64>,
    /// Maximum price in cents.
    pub max_price: Option<i64>,
    pub sort_by: Option<ProductSortBy>,
    pub sort_order: Option<SortOrder>,
}

impl ProductQuery {
    pub fn normalize(&self, default_per_page: i64) -> (i64, i64, i64) {
        normalize(self.page, self.per_page, default_per_page)
    }
}

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
}

impl OrderListQuery {
    pub fn normalize(&self, default_per_page: i64) -> (i64, i64, i64) {
        normalize(self.page, self.per_page, default_per_page)
    }
}

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LowStockQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    /// Products with stock at or below this value are listed. Default 10.
    pub threshold: Option<i32>,
}

impl LowStockQuery {
    pub fn normalize(&self, default_per_page: i64) -> (i64, i64, i64) {
        normalize(self.page, self.per_page, default_per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_clamps() {
        assert_eq!(Pagination::default().normalize(12), (1, 12, 0));
        assert_eq!(Pagination::new(3, 10).normalize(12), (3, 10, 20));
        assert_eq!(Pagination::new(0, 500).normalize(12), (1, MAX_PER_PAGE, 0));
        assert_eq!(Pagination::new(-4, 0).normalize(12), (1, 1, 0));
        assert_eq!(
            Pagination::new(i64::MAX, 12).normalize(12),
            (MAX_PAGE, 12, (MAX_PAGE - 1) * 12)
        );
    }
}
