use crate::handlers::common::{created_response, no_content_response, success_response};
use crate::{
    auth::Actor, entities::product, errors::ServiceError,
    services::catalog::RegisterProductRequest, AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Catalog mirror. Reads are public; writes are the admin ingestion hook.
pub fn products_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(register_product))
        .route("/:id", get(get_product).delete(remove_product))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub effective_price: Decimal,
    pub stock: i32,
}

impl ProductResponse {
    fn new(product: product::Model, state: &AppState) -> Self {
        let price = product.price(state.services.pricing.minor_units());
        Self {
            id: product.id,
            name: product.name,
            unit_price: price.unit_price,
            effective_price: price.effective_unit_price(Utc::now()),
            stock: product.stock,
        }
    }
}

async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state
        .services
        .catalog
        .get_product(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;

    Ok(success_response(ProductResponse::new(product, &state)))
}

async fn register_product(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<RegisterProductRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_admin()?;
    let product = state.services.catalog.register_product(payload).await?;
    Ok(created_response(ProductResponse::new(product, &state)))
}

async fn remove_product(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    actor.require_admin()?;
    if state.services.catalog.remove_product(id).await? {
        Ok(no_content_response())
    } else {
        Err(ServiceError::NotFound(format!("Product {} not found", id)))
    }
}
