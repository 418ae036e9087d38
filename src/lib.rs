//! Storefront API
//!
//! Cart synchronization, pricing, checkout with stock reservation, and order
//! status management for an e-commerce storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::{AuthConfig, AuthService};
use crate::events::{Event, EventSender};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<EventSender>,
    pub auth: Arc<AuthService>,
    pub services: handlers::AppServices,
}

impl AppState {
    /// Wires every service over `db`. The caller owns the returned receiver
    /// and is expected to drain it, normally with [`events::process_events`].
    pub fn new(config: config::AppConfig, db: Arc<DatabaseConnection>) -> (Self, mpsc::Receiver<Event>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let auth = Arc::new(AuthService::new(AuthConfig::new(config.jwt_secret.clone())));
        let services = handlers::AppServices::new(db.clone(), event_sender.clone(), &config);

        let state = Self {
            db,
            config,
            event_sender,
            auth,
            services,
        };
        (state, event_rx)
    }
}

/// Versioned business routes, mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/cart", handlers::carts::carts_routes())
        .nest("/checkout", handlers::checkout::checkout_routes())
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/products", handlers::products::products_routes())
        .nest("/admin/orders", handlers::admin_orders::admin_orders_routes())
}

/// Full application router with the HTTP middleware stack applied.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors_layer = if state.config.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };
    let request_timeout = state.config.request_timeout();

    Router::new()
        .nest("/health", handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors_layer)
        .with_state(state)
}
