//! Catalog specifications.
use serde::{Deserialize, Serialize};

use crate::{
    db_types::Product,
    specification::{Expr, Specification},
};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 50;

/// `price` is stored as TEXT; sorting it lexicographically would put "10" before "5".
const PRICE_SORT_KEY: &str = "CAST(price AS REAL)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductSort {
    #[default]
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "priceAsc")]
    PriceAsc,
    #[serde(rename = "priceDesc")]
    PriceDesc,
}

/// Catalog query parameters: free-text search, brand and type filter sets, one sort key, 1-based paging.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub brands: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub sort: ProductSort,
    pub page_index: i64,
    pub page_size: i64,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            search: None,
            brands: Vec::new(),
            types: Vec::new(),
            sort: ProductSort::default(),
            page_index: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ProductQuery {
    /// Effective page size, clamped to `1..=MAX_PAGE_SIZE`.
    pub fn page_size(&self) -> i64 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Effective 1-based page index.
    pub fn page_index(&self) -> i64 {
        self.page_index.max(1)
    }
}

/// The paged, filtered, sorted catalog listing.
pub fn product_list_spec(query: &ProductQuery) -> Specification<Product> {
    let mut filters = Vec::new();
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        filters.push(Expr::like("name", format!("%{search}%")));
    }
    if !query.brands.is_empty() {
        filters.push(Expr::is_in("brand", query.brands.iter().cloned()));
    }
    if !query.types.is_empty() {
        filters.push(Expr::is_in("product_type", query.types.iter().cloned()));
    }
    let spec = Specification::new(Expr::and(filters))
        .with_paging(query.page_size() * (query.page_index() - 1), query.page_size());
    match query.sort {
        ProductSort::Name => spec.with_order_by("name"),
        ProductSort::PriceAsc => spec.with_order_by(PRICE_SORT_KEY),
        ProductSort::PriceDesc => spec.with_order_by_descending(PRICE_SORT_KEY),
    }
}

/// Distinct brand column, ordered. Projected reads return one `(String,)` row per base row; callers deduplicate
/// the projected values.
pub fn brand_list_spec() -> Specification<Product> {
    Specification::new(None).with_distinct().with_order_by("brand").with_select(vec!["brand"])
}

pub fn type_list_spec() -> Specification<Product> {
    Specification::new(None).with_distinct().with_order_by("product_type").with_select(vec!["product_type"])
}
