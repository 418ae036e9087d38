use crate::handlers::common::created_response;
use crate::{auth::Actor, errors::ServiceError, services::checkout::ContactInfo, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use std::sync::Arc;

pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(create_order))
}

/// Turn the selected cart lines into an order
async fn create_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(contact): Json<ContactInfo>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.checkout.create_order(&actor, contact).await?;
    Ok(created_response(order))
}
