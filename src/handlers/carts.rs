use crate::handlers::common::success_response;
use crate::{auth::Actor, errors::ServiceError, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for the caller's cart
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_item))
        .route("/items/:product_id", put(set_quantity).delete(remove_item))
        .route("/items/:product_id/toggle", post(toggle_selected))
        .route("/select-all", post(select_all))
        .route("/deselect-all", post(deselect_all))
        .route("/selected", delete(remove_selected))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AddItemRequest {
    pub product_id: Uuid,
}

/// A quantity below one is rejected by the cart with `invalid_quantity`.
#[derive(Debug, Deserialize, Serialize)]
pub struct SetQuantityRequest {
    pub quantity: i32,
    /// Line version the client last saw
    pub expected_version: Option<i32>,
}

async fn get_cart(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.get_cart(&actor).await?;
    Ok(success_response(cart))
}

/// Add one unit of a product, or bump the existing line by one
async fn add_item(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .cart
        .add_item(&actor, payload.product_id)
        .await?;
    Ok(success_response(cart))
}

async fn remove_item(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.remove_item(&actor, product_id).await?;
    Ok(success_response(cart))
}

async fn set_quantity(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<SetQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .cart
        .set_quantity(
            &actor,
            product_id,
            payload.quantity,
            payload.expected_version,
        )
        .await?;
    Ok(success_response(cart))
}

async fn toggle_selected(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .cart
        .toggle_selected(&actor, product_id)
        .await?;
    Ok(success_response(cart))
}

async fn select_all(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.select_all(&actor).await?;
    Ok(success_response(cart))
}

async fn deselect_all(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.deselect_all(&actor).await?;
    Ok(success_response(cart))
}

async fn remove_selected(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.remove_selected(&actor).await?;
    Ok(success_response(cart))
}

async fn clear_cart(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.cart.clear(&actor).await?;
    Ok(success_response(cart))
}
