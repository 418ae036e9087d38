pub mod admin_orders;
pub mod carts;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod products;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        cart::CartService,
        catalog::ProductCatalogService,
        checkout::CheckoutService,
        order_status::OrderStatusService,
        orders::OrderQueryService,
        pricing::{PricingEngine, PricingPolicy},
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub pricing: Arc<PricingEngine>,
    pub catalog: Arc<ProductCatalogService>,
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub order_status: Arc<OrderStatusService>,
    pub orders: Arc<OrderQueryService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let pricing = Arc::new(PricingEngine::new(PricingPolicy::from(&config.pricing)));
        let minor_units = pricing.minor_units();
        let currency = config.pricing.currency.clone();

        let catalog = Arc::new(ProductCatalogService::new(db_pool.clone(), minor_units));
        let cart = Arc::new(CartService::new(
            db_pool.clone(),
            event_sender.clone(),
            pricing.clone(),
            currency.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            event_sender.clone(),
            pricing.clone(),
            currency,
            &config.checkout,
        ));
        let order_status = Arc::new(OrderStatusService::new(db_pool.clone(), event_sender));
        let orders = Arc::new(OrderQueryService::new(db_pool, minor_units));

        Self {
            pricing,
            catalog,
            cart,
            checkout,
            order_status,
            orders,
        }
    }
}
