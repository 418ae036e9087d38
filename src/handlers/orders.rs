use crate::handlers::common::{success_response, OrderListParams};
use crate::{auth::Actor, errors::ServiceError, AppState};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// The signed-in customer's own order history
pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_my_orders))
        .route("/:id", get(get_my_order))
}

async fn list_my_orders(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(params): Query<OrderListParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .services
        .orders
        .list_customer_orders(&actor, params.sort(), params.page_request())
        .await?;
    Ok(success_response(page))
}

async fn get_my_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_customer_order(&actor, id).await?;
    Ok(success_response(order))
}
