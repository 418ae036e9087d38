#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::Value;
use storefront_api::{
    auth::{Actor, ADMIN_ROLE},
    config::AppConfig,
    db,
    entities::product,
    events::Event,
    services::{catalog::RegisterProductRequest, checkout::ContactInfo},
    AppState,
};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Application state over a private in-memory SQLite database.
///
/// The pool holds exactly one connection so every test sees one database;
/// concurrent transactions queue on it.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    events: Arc<Mutex<Vec<Event>>>,
    _event_task: JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Pricing matches the storefront's IDR setup: whole-unit currency,
    /// free shipping from 250,000, flat fee 15,000, 11% tax.
    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.pricing.currency = "IDR".to_string();
        cfg.pricing.minor_units = 0;
        cfg.pricing.free_shipping_threshold = dec!(250000);
        cfg.pricing.flat_shipping_fee = dec!(15000);
        cfg.pricing.tax_rate = dec!(0.11);
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (state, mut event_rx) = AppState::new(cfg, Arc::new(pool));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let event_task = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                sink.lock().expect("event sink poisoned").push(event);
            }
        });

        let state = Arc::new(state);
        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            events,
            _event_task: event_task,
        }
    }

    pub fn customer() -> Actor {
        Actor::Customer(Uuid::new_v4())
    }

    pub fn admin() -> Actor {
        Actor::Admin(Uuid::new_v4())
    }

    pub fn token_for(&self, actor: Actor) -> String {
        match actor {
            Actor::Customer(id) => self.state.auth.issue_token(id, &[]),
            Actor::Admin(id) => self.state.auth.issue_token(id, &[ADMIN_ROLE]),
            Actor::Anonymous => panic!("anonymous actors carry no token"),
        }
        .expect("issue token")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.state
            .services
            .catalog
            .register_product(RegisterProductRequest {
                id: None,
                name: name.to_string(),
                unit_price: price,
                discount_price: None,
                discount_expiry: None,
                stock,
            })
            .await
            .expect("seed product for tests")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("read product")
            .expect("product exists")
            .stock
    }

    /// Adds `quantity` units of a product to the actor's cart.
    pub async fn add_to_cart(&self, actor: &Actor, product_id: Uuid, quantity: i32) {
        let cart = &self.state.services.cart;
        cart.add_item(actor, product_id).await.expect("add item");
        if quantity != 1 {
            cart.set_quantity(actor, product_id, quantity, None)
                .await
                .expect("set quantity");
        }
    }

    /// Events published so far. Waits briefly for the collector to catch up.
    pub async fn events(&self) -> Vec<Event> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.events.lock().expect("event sink poisoned").clone()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        // extractor rejections answer in plain text
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn contact() -> ContactInfo {
    ContactInfo {
        name: "Siti Rahma".to_string(),
        email: "siti@example.com".to_string(),
        phone: "+62 812 0000 0000".to_string(),
        shipping_address: "Jl. Merdeka 1, Jakarta".to_string(),
    }
}
