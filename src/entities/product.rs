use crate::services::pricing::{MinorUnits, ProductPrice};
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog snapshot of a sellable product.
///
/// Prices are stored in integer minor units of the store currency.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub name: String,

    /// List price
    pub unit_price_minor: i64,

    /// Promotional price, active only while below the list price and unexpired
    pub discount_price_minor: Option<i64>,

    pub discount_expiry: Option<DateTime<Utc>>,

    pub stock: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn price(&self, minor_units: MinorUnits) -> ProductPrice {
        ProductPrice {
            unit_price: minor_units.from_minor(self.unit_price_minor),
            discount_price: self.discount_price_minor.map(|p| minor_units.from_minor(p)),
            discount_expiry: self.discount_expiry,
        }
    }
}
