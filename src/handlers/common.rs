use crate::{
    entities::order::{OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::orders::{OrderSort, PageRequest, SortDirection, SortField, DEFAULT_PER_PAGE},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Standard no content response
pub fn no_content_response() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

/// Pagination and sort parameters for order listings
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OrderListParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// Opaque `next_cursor` from a previous page; wins over `page`
    pub cursor: Option<String>,
    pub sort_by: Option<SortField>,
    pub sort_dir: Option<SortDirection>,
}

impl OrderListParams {
    pub fn sort(&self) -> OrderSort {
        OrderSort {
            field: self.sort_by.unwrap_or_default(),
            direction: self.sort_dir.unwrap_or_default(),
        }
    }

    pub fn page_request(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            per_page: self.per_page.unwrap_or(DEFAULT_PER_PAGE),
            cursor: self.cursor.clone(),
        }
    }
}

/// Admin listing filters, flattened next to [`OrderListParams`] in the query string
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AdminOrderListParams {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub cursor: Option<String>,
    pub sort_by: Option<SortField>,
    pub sort_dir: Option<SortDirection>,
}

impl AdminOrderListParams {
    pub fn listing(&self) -> OrderListParams {
        OrderListParams {
            page: self.page,
            per_page: self.per_page,
            cursor: self.cursor.clone(),
            sort_by: self.sort_by,
            sort_dir: self.sort_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_defaults_to_newest_first() {
        let params = OrderListParams::default();
        assert_eq!(
            params.sort(),
            OrderSort {
                field: SortField::CreatedAt,
                direction: SortDirection::Desc,
            }
        );
        let page = params.page_request();
        assert_eq!(page.per_page, DEFAULT_PER_PAGE);
        assert_eq!(page.page, None);
    }
}
