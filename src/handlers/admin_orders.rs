use crate::handlers::common::{success_response, validate_input, AdminOrderListParams};
use crate::{
    auth::Actor,
    entities::order::{self, OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::{
        order_status::BulkStatusOutcome,
        orders::{OrderFilter, OrderSummary, ShippingInfoUpdate},
    },
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Order administration; every route requires the admin role
pub fn admin_orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/bulk-status", post(bulk_update_status))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_status))
        .route("/:id/payment-status", put(update_payment_status))
        .route("/:id/shipping", put(update_shipping_info))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub expected_version: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdatePaymentStatusRequest {
    pub payment_status: PaymentStatus,
    pub expected_version: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct BulkStatusRequest {
    #[validate(length(min = 1, max = 100, message = "Between 1 and 100 orders per request"))]
    pub order_ids: Vec<Uuid>,
    pub status: OrderStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkItemError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub order_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BulkItemError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkStatusResponse {
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BulkItemResult>,
}

impl BulkStatusResponse {
    fn from_outcomes(outcomes: Vec<BulkStatusOutcome>, state: &AppState) -> Self {
        let minor_units = state.services.pricing.minor_units();
        let results: Vec<BulkItemResult> = outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(model) => BulkItemResult {
                    order_id: outcome.order_id,
                    success: true,
                    order: Some(OrderSummary::from_model(model, minor_units)),
                    error: None,
                },
                Err(e) => BulkItemResult {
                    order_id: outcome.order_id,
                    success: false,
                    order: None,
                    error: Some(BulkItemError {
                        code: e.code().to_string(),
                        message: e.response_message(),
                    }),
                },
            })
            .collect();
        let succeeded = results.iter().filter(|r| r.success).count();

        Self {
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}

fn summary(state: &AppState, model: order::Model) -> OrderSummary {
    OrderSummary::from_model(model, state.services.pricing.minor_units())
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(params): Query<AdminOrderListParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let listing = params.listing();
    let filter = OrderFilter {
        status: params.status,
        payment_status: params.payment_status,
        from: params.from,
        to: params.to,
        search: params.search,
    };

    let page = state
        .services
        .orders
        .list_orders(&actor, filter, listing.sort(), listing.page_request())
        .await?;
    Ok(success_response(page))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(&actor, id).await?;
    Ok(success_response(order))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .order_status
        .update_status(&actor, id, payload.status, payload.expected_version)
        .await?;
    Ok(success_response(summary(&state, order)))
}

async fn update_payment_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .order_status
        .update_payment_status(&actor, id, payload.payment_status, payload.expected_version)
        .await?;
    Ok(success_response(summary(&state, order)))
}

/// Apply one status to many orders; each order succeeds or fails on its own
async fn bulk_update_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<BulkStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_admin()?;
    validate_input(&payload)?;

    let outcomes = state
        .services
        .order_status
        .batch_update_status(&actor, &payload.order_ids, payload.status)
        .await?;
    Ok(success_response(BulkStatusResponse::from_outcomes(
        outcomes, &state,
    )))
}

async fn update_shipping_info(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<ShippingInfoUpdate>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .update_shipping_info(&actor, id, payload)
        .await?;
    Ok(success_response(order))
}
