use serde::{Deserialize, Serialize};
use store_engine::specification::product::{ProductQuery, ProductSort, DEFAULT_PAGE_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Into<String>>(message: S) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// The envelope every paged listing is returned in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination<T> {
    pub page_index: i64,
    pub page_size: i64,
    /// The total match count before paging, so clients can compute the page count.
    pub count: i64,
    pub data: Vec<T>,
}

/// Catalog listing parameters as they arrive on the query string. `brands` and `types` are comma-separated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListParams {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub brands: Option<String>,
    #[serde(default)]
    pub types: Option<String>,
    #[serde(default)]
    pub sort: Option<ProductSort>,
    #[serde(default)]
    pub page_index: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
}

fn split_csv(csv: Option<&str>) -> Vec<String> {
    csv.map(|s| s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()).unwrap_or_default()
}

impl From<ProductListParams> for ProductQuery {
    fn from(params: ProductListParams) -> Self {
        ProductQuery {
            search: params.search.filter(|s| !s.is_empty()),
            brands: split_csv(params.brands.as_deref()),
            types: split_csv(params.types.as_deref()),
            sort: params.sort.unwrap_or_default(),
            page_index: params.page_index.unwrap_or(1),
            page_size: params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }
}
