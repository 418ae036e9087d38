use crate::{
    auth::Actor,
    config::CheckoutConfig,
    entities::{
        cart_item,
        order::{self, OrderStatus, PaymentStatus},
        order_item, order_status_history, product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::{load_lines, touch_cart},
        catalog::{find_product, reserve_stock},
        orders::OrderDetail,
        pricing::{PriceBreakdown, PricedLine, PricingEngine},
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Shipping and contact fields copied onto the order. Opaque to this
/// service beyond being non-empty.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ContactInfo {
    #[validate(length(min = 1, max = 200, message = "Contact name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 254, message = "Contact email is required"))]
    pub email: String,
    #[validate(length(min = 1, max = 50, message = "Contact phone is required"))]
    pub phone: String,
    #[validate(length(min = 1, max = 1000, message = "Shipping address is required"))]
    pub shipping_address: String,
}

/// Everything written by one successful pipeline run.
struct PlacedOrder {
    order: order::Model,
    items: Vec<order_item::Model>,
    history: order_status_history::Model,
    cart_revision: i64,
}

/// Converts the selected cart lines into an order in one transaction:
/// validate, reprice, reserve stock, persist, drain.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    pricing: Arc<PricingEngine>,
    currency: String,
    order_number_prefix: String,
    timeout: Duration,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        pricing: Arc<PricingEngine>,
        currency: String,
        config: &CheckoutConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            pricing,
            currency,
            order_number_prefix: config.order_number_prefix.clone(),
            timeout: config.order_creation_timeout(),
        }
    }

    /// Places an order for the caller's selected cart lines.
    ///
    /// # Errors
    ///
    /// * `EmptyCart` when nothing is selected
    /// * `ProductUnavailable` when a selected product left the catalog
    /// * `InsufficientStock` when a line asks for more than is left, including
    ///   losing a race for the last units to a concurrent checkout
    /// * `ServiceUnavailable` when the deadline elapses before the commit;
    ///   nothing is kept
    ///
    /// On any error the stock and the cart are exactly as before the call.
    #[instrument(skip(self, contact))]
    pub async fn create_order(
        &self,
        actor: &Actor,
        contact: ContactInfo,
    ) -> Result<OrderDetail, ServiceError> {
        self.create_order_with_discount(actor, contact, Decimal::ZERO)
            .await
    }

    /// Same as [`create_order`](Self::create_order) with a discount amount
    /// supplied by an upstream promotion engine.
    #[instrument(skip(self, contact))]
    pub async fn create_order_with_discount(
        &self,
        actor: &Actor,
        contact: ContactInfo,
        discount: Decimal,
    ) -> Result<OrderDetail, ServiceError> {
        let user_id = actor.shopper_id()?;
        contact.validate()?;
        if discount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount cannot be negative".to_string(),
            ));
        }

        // The deadline covers everything up to the commit. Once the commit
        // is sent its outcome is the outcome of the call.
        let staged =
            tokio::time::timeout(self.timeout, self.stage(user_id, contact, discount)).await;
        let (txn, placed) = match staged {
            Ok(result) => result?,
            Err(_) => {
                // The dropped transaction rolls back.
                error!(user_id = %user_id, timeout = ?self.timeout, "Order creation timed out");
                counter!("storefront.orders.timed_out", 1);
                return Err(ServiceError::ServiceUnavailable(
                    "order creation timed out".to_string(),
                ));
            }
        };

        txn.commit().await?;

        let order = &placed.order;
        counter!("storefront.orders.created", 1);
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total_minor = order.total_minor,
            "Order created"
        );

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
                customer_id: user_id,
                total_minor: order.total_minor,
            })
            .await;
        self.event_sender
            .send_or_log(Event::CartUpdated {
                user_id,
                revision: placed.cart_revision,
            })
            .await;

        Ok(OrderDetail::from_parts(
            placed.order,
            placed.items,
            vec![placed.history],
            self.pricing.minor_units(),
        ))
    }

    /// Runs the pipeline in a fresh transaction and hands back the
    /// uncommitted transaction. Failures are rolled back here.
    async fn stage(
        &self,
        user_id: Uuid,
        contact: ContactInfo,
        discount: Decimal,
    ) -> Result<(DatabaseTransaction, PlacedOrder), ServiceError> {
        let txn = self.db.begin().await?;

        match self.run_pipeline(&txn, user_id, contact, discount).await {
            Ok(placed) => Ok((txn, placed)),
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(
                        user_id = %user_id,
                        error = %rollback_err,
                        cause = %e,
                        "Rollback of failed order creation failed"
                    );
                    self.event_sender
                        .send_or_log(Event::IntegrityAlert {
                            operation: "create_order".to_string(),
                            detail: format!("rollback failed: {}; cause: {}", rollback_err, e),
                        })
                        .await;
                    return Err(ServiceError::IntegrityViolation(format!(
                        "order creation for user {} could not be rolled back",
                        user_id
                    )));
                }
                counter!("storefront.orders.rejected", 1, "reason" => e.code());
                if e.is_recoverable() {
                    warn!(user_id = %user_id, error = %e, "Order creation rejected");
                } else {
                    error!(user_id = %user_id, error = %e, "Order creation failed");
                }
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
        contact: ContactInfo,
        discount: Decimal,
    ) -> Result<PlacedOrder, ServiceError> {
        // Locks the user's cart for the rest of the transaction.
        let cart_revision = touch_cart(txn, user_id).await?;

        let selected: Vec<cart_item::Model> = load_lines(txn, user_id)
            .await?
            .into_iter()
            .filter(|line| line.selected)
            .collect();
        if selected.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let now = Utc::now();
        let mut lines: Vec<(cart_item::Model, product::Model)> =
            Vec::with_capacity(selected.len());
        for line in selected {
            let product = find_product(txn, line.product_id)
                .await?
                .ok_or(ServiceError::ProductUnavailable(line.product_id))?;
            if line.quantity > product.stock {
                return Err(ServiceError::InsufficientStock {
                    product_id: product.id,
                    product_name: product.name,
                    available: product.stock,
                    requested: line.quantity,
                });
            }
            lines.push((line, product));
        }

        let minor_units = self.pricing.minor_units();
        let priced: Vec<PricedLine> = lines
            .iter()
            .map(|(line, product)| PricedLine {
                product_id: product.id,
                unit_price: product.price(minor_units).effective_unit_price(now),
                quantity: line.quantity,
            })
            .collect();
        let breakdown = self.pricing.quote(&priced, discount);
        if breakdown.discount > breakdown.subtotal {
            return Err(ServiceError::ValidationError(
                "discount exceeds order subtotal".to_string(),
            ));
        }
        breakdown.verify()?;

        // Reserve in product id order so concurrent checkouts lock rows in
        // the same order.
        let mut reservation_order: Vec<&(cart_item::Model, product::Model)> =
            lines.iter().collect();
        reservation_order.sort_by_key(|(_, product)| product.id);
        for (line, product) in reservation_order {
            reserve_stock(txn, product, line.quantity).await?;
        }

        let order_id = Uuid::new_v4();
        let order = self
            .insert_order(txn, order_id, user_id, &breakdown, contact, now)
            .await?;

        let mut items = Vec::with_capacity(lines.len());
        for (line_no, ((_, product), priced)) in lines.iter().zip(&priced).enumerate() {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                line_no: Set(line_no as i32 + 1),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                unit_price_minor: Set(minor_units.to_minor(priced.unit_price)?),
                quantity: Set(priced.quantity),
            };
            items.push(item.insert(txn).await?);
        }

        let history = order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            seq: Set(1),
            from_status: Set(None),
            to_status: Set(OrderStatus::Pending),
            changed_by: Set(Some(user_id)),
            changed_at: Set(now),
        }
        .insert(txn)
        .await?;

        let drained: Vec<Uuid> = lines.iter().map(|(line, _)| line.id).collect();
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.is_in(drained))
            .exec(txn)
            .await?;

        Ok(PlacedOrder {
            order,
            items,
            history,
            cart_revision,
        })
    }

    async fn insert_order(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
        user_id: Uuid,
        breakdown: &PriceBreakdown,
        contact: ContactInfo,
        now: DateTime<Utc>,
    ) -> Result<order::Model, ServiceError> {
        let minor_units = self.pricing.minor_units();
        let model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(&self.order_number_prefix, now)),
            customer_id: Set(user_id),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            currency: Set(self.currency.clone()),
            subtotal_minor: Set(minor_units.to_minor(breakdown.subtotal)?),
            shipping_fee_minor: Set(minor_units.to_minor(breakdown.shipping_fee)?),
            tax_minor: Set(minor_units.to_minor(breakdown.tax)?),
            discount_minor: Set(minor_units.to_minor(breakdown.discount)?),
            total_minor: Set(minor_units.to_minor(breakdown.total)?),
            contact_name: Set(contact.name),
            contact_email: Set(contact.email),
            contact_phone: Set(contact.phone),
            shipping_address: Set(contact.shipping_address),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(txn).await?)
    }
}

/// `{prefix}-{YYYYMMDD}-{8 hex chars}`, e.g. `ORD-20240301-9F2C4A1B`.
pub fn generate_order_number(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("{}-{}-{}", prefix, at.format("%Y%m%d"), suffix)
}
