use crate::{
    entities::product,
    errors::ServiceError,
    services::pricing::MinorUnits,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Product as pushed by the catalog sync.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterProductRequest {
    pub id: Option<Uuid>,
    #[validate(length(
        min = 1,
        max = 255,
        message = "Product name must be between 1 and 255 characters"
    ))]
    pub name: String,
    #[validate(custom = "validate_positive")]
    pub unit_price: Decimal,
    pub discount_price: Option<Decimal>,
    pub discount_expiry: Option<DateTime<Utc>>,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,
}

fn validate_positive(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        let mut err = ValidationError::new("positive");
        err.message = Some("must be greater than zero".into());
        return Err(err);
    }
    Ok(())
}

/// Catalog reader over the `products` mirror table.
///
/// The connection-generic functions below are what the cart and checkout
/// paths call inside their own transactions.
#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DatabaseConnection>,
    minor_units: MinorUnits,
}

impl ProductCatalogService {
    pub fn new(db: Arc<DatabaseConnection>, minor_units: MinorUnits) -> Self {
        Self { db, minor_units }
    }

    /// Latest committed state of a product, or `None` if it left the catalog.
    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        find_product(&*self.db, id).await
    }

    /// Inserts or replaces a product. This is the ingestion hook for the
    /// external catalog.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn register_product(
        &self,
        request: RegisterProductRequest,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;

        let now = Utc::now();
        let id = request.id.unwrap_or_else(Uuid::new_v4);
        let unit_price_minor = self.minor_units.to_minor(request.unit_price)?;
        let discount_price_minor = request
            .discount_price
            .map(|p| self.minor_units.to_minor(p))
            .transpose()?;

        let model = product::ActiveModel {
            id: Set(id),
            name: Set(request.name),
            unit_price_minor: Set(unit_price_minor),
            discount_price_minor: Set(discount_price_minor),
            discount_expiry: Set(request.discount_expiry),
            stock: Set(request.stock),
            created_at: Set(now),
            updated_at: Set(now),
        };

        product::Entity::insert(model)
            .on_conflict(
                OnConflict::column(product::Column::Id)
                    .update_columns([
                        product::Column::Name,
                        product::Column::UnitPriceMinor,
                        product::Column::DiscountPriceMinor,
                        product::Column::DiscountExpiry,
                        product::Column::Stock,
                        product::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        info!(product_id = %id, "Registered product");

        find_product(&*self.db, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    /// Removes a product from the catalog mirror. Cart lines pointing at it
    /// stay and are reported unavailable.
    #[instrument(skip(self))]
    pub async fn remove_product(&self, id: Uuid) -> Result<bool, ServiceError> {
        let res = product::Entity::delete_by_id(id).exec(&*self.db).await?;
        Ok(res.rows_affected > 0)
    }
}

pub async fn find_product<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<Option<product::Model>, ServiceError> {
    Ok(product::Entity::find_by_id(id).one(conn).await?)
}

/// Takes `quantity` units of stock with a single conditional update
/// (`stock >= quantity`). Two racing checkouts cannot both succeed for the
/// last unit; the loser gets `InsufficientStock` with the stock it now sees.
pub async fn reserve_stock<C: ConnectionTrait>(
    conn: &C,
    product: &product::Model,
    quantity: i32,
) -> Result<(), ServiceError> {
    let res = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product.id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if res.rows_affected == 1 {
        counter!("storefront.stock.reserved", quantity as u64);
        return Ok(());
    }

    let current = find_product(conn, product.id).await?;
    match current {
        None => Err(ServiceError::ProductUnavailable(product.id)),
        Some(current) => {
            warn!(
                product_id = %product.id,
                available = current.stock,
                requested = quantity,
                "Stock reservation lost"
            );
            Err(ServiceError::InsufficientStock {
                product_id: product.id,
                product_name: current.name,
                available: current.stock,
                requested: quantity,
            })
        }
    }
}

/// Returns stock taken by an order. A product that has since left the
/// catalog is skipped and reported as `false`.
pub async fn release_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let res = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).add(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .exec(conn)
        .await?;

    if res.rows_affected == 0 {
        warn!(product_id = %product_id, quantity, "Released stock for unknown product");
        return Ok(false);
    }
    counter!("storefront.stock.released", quantity as u64);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn request_validation() {
        let ok = RegisterProductRequest {
            id: None,
            name: "Mug".into(),
            unit_price: dec!(12.50),
            discount_price: None,
            discount_expiry: None,
            stock: 3,
        };
        assert!(ok.validate().is_ok());

        let free = RegisterProductRequest {
            unit_price: Decimal::ZERO,
            ..ok.clone()
        };
        assert!(free.validate().is_err());

        let negative_stock = RegisterProductRequest { stock: -1, ..ok };
        assert!(negative_stock.validate().is_err());
    }
}
