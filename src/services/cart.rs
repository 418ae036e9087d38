use crate::{
    auth::Actor,
    entities::{cart, cart_item, product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::pricing::{PriceBreakdown, PricedLine, PricingEngine},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One cart line joined with live catalog data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    /// `None` once the product has left the catalog
    pub product_name: Option<String>,
    pub quantity: i32,
    pub selected: bool,
    pub version: i32,
    /// Price captured when the line was (re-)added. Display only.
    pub price_at_add: Decimal,
    /// Current effective unit price
    pub unit_price: Option<Decimal>,
    pub line_total: Option<Decimal>,
    pub available: bool,
    pub stock: Option<i32>,
}

/// Authoritative view of one user's cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub user_id: Uuid,
    pub revision: i64,
    pub currency: String,
    pub items: Vec<CartLine>,
    /// Totals over the selected, available lines
    pub pricing: PriceBreakdown,
}

impl CartSnapshot {
    pub fn empty(user_id: Uuid, currency: &str) -> Self {
        Self {
            user_id,
            revision: 0,
            currency: currency.to_string(),
            items: Vec::new(),
            pricing: PriceBreakdown::zero(),
        }
    }

    pub fn item(&self, product_id: Uuid) -> Option<&CartLine> {
        self.items.iter().find(|l| l.product_id == product_id)
    }

    pub fn selected_items(&self) -> impl Iterator<Item = &CartLine> {
        self.items.iter().filter(|l| l.selected)
    }

    pub fn total_quantity(&self) -> i32 {
        self.items.iter().map(|l| l.quantity).sum()
    }
}

/// Client-side copy of the cart used for rendering. Snapshots may arrive out
/// of order; one older than the copy held is ignored.
#[derive(Debug, Default, Clone)]
pub struct CartMirror {
    current: Option<CartSnapshot>,
}

impl CartMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the snapshot was taken.
    pub fn accept(&mut self, snapshot: CartSnapshot) -> bool {
        if let Some(current) = &self.current {
            if current.user_id == snapshot.user_id && snapshot.revision < current.revision {
                return false;
            }
        }
        self.current = Some(snapshot);
        true
    }

    pub fn current(&self) -> Option<&CartSnapshot> {
        self.current.as_ref()
    }

    pub fn revision(&self) -> Option<i64> {
        self.current.as_ref().map(|s| s.revision)
    }

    /// Forget the cart, e.g. on sign-out.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Cart aggregate.
///
/// Every mutation runs in one transaction that first bumps the user's
/// `carts.revision` (taking the per-user row lock), applies the change, and
/// re-reads the snapshot before committing.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    pricing: Arc<PricingEngine>,
    currency: String,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        pricing: Arc<PricingEngine>,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            pricing,
            currency,
        }
    }

    /// Current cart with live prices. An administrator's cart is always empty.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, actor: &Actor) -> Result<CartSnapshot, ServiceError> {
        let user_id = match actor {
            Actor::Admin(id) => return Ok(CartSnapshot::empty(*id, &self.currency)),
            _ => actor.shopper_id()?,
        };
        load_snapshot(&*self.db, &self.pricing, &self.currency, user_id).await
    }

    /// Adds one unit of a product. A product already in the cart has its
    /// quantity incremented; the `(user_id, product_id)` unique index makes
    /// two racing adds land on the same row.
    ///
    /// # Errors
    ///
    /// * `AuthenticationRequired` / `ForbiddenOperation` for anonymous or admin callers
    /// * `ProductUnavailable` if the product is not in the catalog
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_item(
        &self,
        actor: &Actor,
        product_id: Uuid,
    ) -> Result<CartSnapshot, ServiceError> {
        let user_id = actor.shopper_id()?;
        let txn = self.db.begin().await?;

        let product = product::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or(ServiceError::ProductUnavailable(product_id))?;

        touch_cart(&txn, user_id).await?;

        let minor_units = self.pricing.minor_units();
        let effective = product.price(minor_units).effective_unit_price(Utc::now());
        let price_at_add_minor = minor_units.to_minor(effective)?;
        let now = Utc::now();

        let line = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            quantity: Set(1),
            selected: Set(true),
            price_at_add_minor: Set(price_at_add_minor),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };

        cart_item::Entity::insert(line)
            .on_conflict(
                OnConflict::columns([cart_item::Column::UserId, cart_item::Column::ProductId])
                    .value(
                        cart_item::Column::Quantity,
                        Expr::col((cart_item::Entity, cart_item::Column::Quantity)).add(1),
                    )
                    .value(
                        cart_item::Column::Version,
                        Expr::col((cart_item::Entity, cart_item::Column::Version)).add(1),
                    )
                    .update_columns([
                        cart_item::Column::PriceAtAddMinor,
                        cart_item::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        let snapshot = self.commit(txn, user_id).await?;
        info!(user_id = %user_id, revision = snapshot.revision, "Added item to cart");
        Ok(snapshot)
    }

    /// Removes a product's line. Removing a product that is not in the cart
    /// is a no-op.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove_item(
        &self,
        actor: &Actor,
        product_id: Uuid,
    ) -> Result<CartSnapshot, ServiceError> {
        let user_id = actor.shopper_id()?;
        let txn = self.db.begin().await?;
        touch_cart(&txn, user_id).await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;

        self.commit(txn, user_id).await
    }

    /// Sets the quantity of a line. Not capped at stock; stock is only
    /// enforced at checkout.
    ///
    /// With `expected_version`, the write only applies if the line has not
    /// changed since the caller last saw it.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn set_quantity(
        &self,
        actor: &Actor,
        product_id: Uuid,
        quantity: i32,
        expected_version: Option<i32>,
    ) -> Result<CartSnapshot, ServiceError> {
        let user_id = actor.shopper_id()?;
        if quantity < 1 {
            warn!(quantity, "Rejected cart quantity");
            return Err(ServiceError::InvalidQuantity { quantity });
        }

        let txn = self.db.begin().await?;
        touch_cart(&txn, user_id).await?;
        let item = find_line(&txn, user_id, product_id).await?;

        let expected = expected_version.unwrap_or(item.version);
        let res = cart_item::Entity::update_many()
            .col_expr(cart_item::Column::Quantity, Expr::value(quantity))
            .col_expr(
                cart_item::Column::Version,
                Expr::col(cart_item::Column::Version).add(1),
            )
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::Id.eq(item.id))
            .filter(cart_item::Column::Version.eq(expected))
            .exec(&txn)
            .await?;

        if res.rows_affected == 0 {
            warn!(item_id = %item.id, expected, actual = item.version, "Stale cart line version");
            return Err(ServiceError::PersistenceConflict {
                entity: "cart_item",
                id: item.id,
            });
        }

        self.commit(txn, user_id).await
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn toggle_selected(
        &self,
        actor: &Actor,
        product_id: Uuid,
    ) -> Result<CartSnapshot, ServiceError> {
        let user_id = actor.shopper_id()?;
        let txn = self.db.begin().await?;
        touch_cart(&txn, user_id).await?;
        let item = find_line(&txn, user_id, product_id).await?;

        cart_item::Entity::update_many()
            .col_expr(cart_item::Column::Selected, Expr::value(!item.selected))
            .col_expr(
                cart_item::Column::Version,
                Expr::col(cart_item::Column::Version).add(1),
            )
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::Id.eq(item.id))
            .exec(&txn)
            .await?;

        self.commit(txn, user_id).await
    }

    #[instrument(skip(self))]
    pub async fn select_all(&self, actor: &Actor) -> Result<CartSnapshot, ServiceError> {
        self.set_all_selected(actor, true).await
    }

    #[instrument(skip(self))]
    pub async fn deselect_all(&self, actor: &Actor) -> Result<CartSnapshot, ServiceError> {
        self.set_all_selected(actor, false).await
    }

    async fn set_all_selected(
        &self,
        actor: &Actor,
        selected: bool,
    ) -> Result<CartSnapshot, ServiceError> {
        let user_id = actor.shopper_id()?;
        let txn = self.db.begin().await?;
        touch_cart(&txn, user_id).await?;

        cart_item::Entity::update_many()
            .col_expr(cart_item::Column::Selected, Expr::value(selected))
            .col_expr(
                cart_item::Column::Version,
                Expr::col(cart_item::Column::Version).add(1),
            )
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::Selected.ne(selected))
            .exec(&txn)
            .await?;

        self.commit(txn, user_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove_selected(&self, actor: &Actor) -> Result<CartSnapshot, ServiceError> {
        let user_id = actor.shopper_id()?;
        let txn = self.db.begin().await?;
        touch_cart(&txn, user_id).await?;

        let res = cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::Selected.eq(true))
            .exec(&txn)
            .await?;

        info!(user_id = %user_id, removed = res.rows_affected, "Removed selected cart items");
        self.commit(txn, user_id).await
    }

    /// Empties the cart.
    #[instrument(skip(self))]
    pub async fn clear(&self, actor: &Actor) -> Result<CartSnapshot, ServiceError> {
        let user_id = actor.shopper_id()?;
        let txn = self.db.begin().await?;
        touch_cart(&txn, user_id).await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;

        let snapshot = load_snapshot(&txn, &self.pricing, &self.currency, user_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartCleared {
                user_id,
                revision: snapshot.revision,
            })
            .await;
        info!(user_id = %user_id, "Cleared cart");
        Ok(snapshot)
    }

    /// Re-reads the snapshot inside the transaction, commits, then publishes.
    async fn commit(
        &self,
        txn: DatabaseTransaction,
        user_id: Uuid,
    ) -> Result<CartSnapshot, ServiceError> {
        let snapshot = load_snapshot(&txn, &self.pricing, &self.currency, user_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartUpdated {
                user_id,
                revision: snapshot.revision,
            })
            .await;
        Ok(snapshot)
    }
}

/// Creates the cart header on first use and bumps its revision. Returns the
/// new revision.
pub async fn touch_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<i64, ServiceError> {
    let now = Utc::now();
    let header = cart::ActiveModel {
        user_id: Set(user_id),
        revision: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    };

    cart::Entity::insert(header)
        .on_conflict(
            OnConflict::column(cart::Column::UserId)
                .value(
                    cart::Column::Revision,
                    Expr::col((cart::Entity, cart::Column::Revision)).add(1),
                )
                .update_column(cart::Column::UpdatedAt)
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    let header = cart::Entity::find_by_id(user_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError(format!("cart header for {} missing", user_id)))?;
    Ok(header.revision)
}

/// Lines of a cart in insertion order.
pub async fn load_lines<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Vec<cart_item::Model>, ServiceError> {
    Ok(cart_item::Entity::find()
        .filter(cart_item::Column::UserId.eq(user_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .order_by_asc(cart_item::Column::Id)
        .all(conn)
        .await?)
}

async fn find_line<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    product_id: Uuid,
) -> Result<cart_item::Model, ServiceError> {
    cart_item::Entity::find()
        .filter(cart_item::Column::UserId.eq(user_id))
        .filter(cart_item::Column::ProductId.eq(product_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} is not in the cart", product_id)))
}

/// Builds the snapshot from committed (or in-transaction) state, pricing the
/// selected lines at current catalog prices.
pub async fn load_snapshot<C: ConnectionTrait>(
    conn: &C,
    pricing: &PricingEngine,
    currency: &str,
    user_id: Uuid,
) -> Result<CartSnapshot, ServiceError> {
    let revision = cart::Entity::find_by_id(user_id)
        .one(conn)
        .await?
        .map_or(0, |c| c.revision);

    let lines = load_lines(conn, user_id).await?;
    let product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let products: HashMap<Uuid, product::Model> = if product_ids.is_empty() {
        HashMap::new()
    } else {
        product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect()
    };

    let minor_units = pricing.minor_units();
    let now = Utc::now();
    let mut priced = Vec::new();
    let items: Vec<CartLine> = lines
        .into_iter()
        .map(|line| {
            let product = products.get(&line.product_id);
            let unit_price = product.map(|p| p.price(minor_units).effective_unit_price(now));
            if let (true, Some(price)) = (line.selected, unit_price) {
                priced.push(PricedLine {
                    product_id: line.product_id,
                    unit_price: price,
                    quantity: line.quantity,
                });
            }
            CartLine {
                item_id: line.id,
                product_id: line.product_id,
                product_name: product.map(|p| p.name.clone()),
                quantity: line.quantity,
                selected: line.selected,
                version: line.version,
                price_at_add: minor_units.from_minor(line.price_at_add_minor),
                unit_price,
                line_total: unit_price.map(|p| p * Decimal::from(line.quantity)),
                available: product.is_some(),
                stock: product.map(|p| p.stock),
            }
        })
        .collect();

    Ok(CartSnapshot {
        user_id,
        revision,
        currency: currency.to_string(),
        items,
        pricing: pricing.quote(&priced, Decimal::ZERO),
    })
}
