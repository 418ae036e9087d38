use crate::{
    auth::Actor,
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_item, order_status_history,
    },
    errors::ServiceError,
    services::pricing::MinorUnits,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, LikeExpr, Order},
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_PER_PAGE: u64 = 20;
pub const MAX_PER_PAGE: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub changed_by: Option<Uuid>,
    pub changed_at: DateTime<Utc>,
}

impl From<order_status_history::Model> for StatusHistoryEntry {
    fn from(row: order_status_history::Model) -> Self {
        Self {
            from_status: row.from_status,
            to_status: row.to_status,
            changed_by: row.changed_by,
            changed_at: row.changed_at,
        }
    }
}

/// Order header with amounts in currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub currency: String,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub shipping_address: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderSummary {
    pub fn from_model(model: order::Model, minor_units: MinorUnits) -> Self {
        Self {
            id: model.id,
            order_number: model.order_number,
            customer_id: model.customer_id,
            status: model.status,
            payment_status: model.payment_status,
            currency: model.currency,
            subtotal: minor_units.from_minor(model.subtotal_minor),
            shipping_fee: minor_units.from_minor(model.shipping_fee_minor),
            tax: minor_units.from_minor(model.tax_minor),
            discount: minor_units.from_minor(model.discount_minor),
            total: minor_units.from_minor(model.total_minor),
            contact_name: model.contact_name,
            contact_email: model.contact_email,
            contact_phone: model.contact_phone,
            shipping_address: model.shipping_address,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: OrderSummary,
    pub items: Vec<OrderLine>,
    pub history: Vec<StatusHistoryEntry>,
}

impl OrderDetail {
    pub fn from_parts(
        order: order::Model,
        items: Vec<order_item::Model>,
        history: Vec<order_status_history::Model>,
        minor_units: MinorUnits,
    ) -> Self {
        let items = items
            .into_iter()
            .map(|line| {
                let unit_price = minor_units.from_minor(line.unit_price_minor);
                OrderLine {
                    product_id: line.product_id,
                    product_name: line.product_name,
                    unit_price,
                    quantity: line.quantity,
                    line_total: unit_price * Decimal::from(line.quantity),
                }
            })
            .collect();

        Self {
            order: OrderSummary::from_model(order, minor_units),
            items,
            history: history.into_iter().map(Into::into).collect(),
        }
    }
}

/// Loads lines and status history for an order.
pub async fn load_order_detail<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
    minor_units: MinorUnits,
) -> Result<OrderDetail, ServiceError> {
    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .order_by_asc(order_item::Column::LineNo)
        .all(conn)
        .await?;
    let history = order_status_history::Entity::find()
        .filter(order_status_history::Column::OrderId.eq(order.id))
        .order_by_asc(order_status_history::Column::Seq)
        .all(conn)
        .await?;
    Ok(OrderDetail::from_parts(order, items, history, minor_units))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    /// Inclusive lower bound on `created_at`
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub to: Option<DateTime<Utc>>,
    /// Matches order number, contact name or contact email
    #[validate(length(max = 200, message = "Search text is too long"))]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    Total,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSort {
    pub field: SortField,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: Option<u64>,
    pub per_page: u64,
    pub cursor: Option<String>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: None,
            per_page: DEFAULT_PER_PAGE,
            cursor: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPage {
    pub items: Vec<OrderSummary>,
    /// Rows matching the filter, ignoring the cursor
    pub total: u64,
    pub page: Option<u64>,
    pub per_page: u64,
    pub next_cursor: Option<String>,
}

/// Position after the last row of a page, tied to the sort it was made for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CursorKey {
    sort: OrderSort,
    created_at: DateTime<Utc>,
    total_minor: i64,
    id: Uuid,
}

impl CursorKey {
    fn after(model: &order::Model, sort: OrderSort) -> Self {
        Self {
            sort,
            created_at: model.created_at,
            total_minor: model.total_minor,
            id: model.id,
        }
    }

    fn encode(&self) -> Result<String, ServiceError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| ServiceError::InternalError(format!("cursor encoding failed: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    fn decode(cursor: &str) -> Result<Self, ServiceError> {
        let invalid = || ServiceError::ValidationError("invalid pagination cursor".to_string());
        let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
        serde_json::from_slice(&bytes).map_err(|_| invalid())
    }

    /// Rows strictly after this key in `sort` order, ties broken by id.
    fn condition(&self) -> Condition {
        let desc = self.sort.direction == SortDirection::Desc;
        let (key_col, tie) = match self.sort.field {
            SortField::CreatedAt => (
                order::Column::CreatedAt,
                order::Column::CreatedAt.eq(self.created_at),
            ),
            SortField::Total => (
                order::Column::TotalMinor,
                order::Column::TotalMinor.eq(self.total_minor),
            ),
        };
        let past_key = match (self.sort.field, desc) {
            (SortField::CreatedAt, true) => key_col.lt(self.created_at),
            (SortField::CreatedAt, false) => key_col.gt(self.created_at),
            (SortField::Total, true) => key_col.lt(self.total_minor),
            (SortField::Total, false) => key_col.gt(self.total_minor),
        };
        let past_id = if desc {
            order::Column::Id.lt(self.id)
        } else {
            order::Column::Id.gt(self.id)
        };

        Condition::any()
            .add(past_key)
            .add(Condition::all().add(tie).add(past_id))
    }
}

/// Updatable contact/shipping fields. Absent fields are left unchanged;
/// present ones must be non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ShippingInfoUpdate {
    #[validate(length(min = 1, max = 200, message = "Contact name cannot be empty"))]
    pub contact_name: Option<String>,
    #[validate(length(min = 1, max = 254, message = "Contact email cannot be empty"))]
    pub contact_email: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Contact phone cannot be empty"))]
    pub contact_phone: Option<String>,
    #[validate(length(min = 1, max = 1000, message = "Shipping address cannot be empty"))]
    pub shipping_address: Option<String>,
    pub expected_version: Option<i32>,
}

impl ShippingInfoUpdate {
    fn is_empty(&self) -> bool {
        self.contact_name.is_none()
            && self.contact_email.is_none()
            && self.contact_phone.is_none()
            && self.shipping_address.is_none()
    }
}

/// Order history for customers and the admin console.
#[derive(Clone)]
pub struct OrderQueryService {
    db: Arc<DatabaseConnection>,
    minor_units: MinorUnits,
}

impl OrderQueryService {
    pub fn new(db: Arc<DatabaseConnection>, minor_units: MinorUnits) -> Self {
        Self { db, minor_units }
    }

    /// Lists all orders matching `filter` (admin only).
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        actor: &Actor,
        filter: OrderFilter,
        sort: OrderSort,
        page: PageRequest,
    ) -> Result<OrderPage, ServiceError> {
        actor.require_admin()?;
        filter.validate()?;
        self.query_page(order::Entity::find().filter(filter_condition(&filter)), sort, page)
            .await
    }

    /// The caller's own orders.
    #[instrument(skip(self))]
    pub async fn list_customer_orders(
        &self,
        actor: &Actor,
        sort: OrderSort,
        page: PageRequest,
    ) -> Result<OrderPage, ServiceError> {
        let customer_id = actor.shopper_id()?;
        let query = order::Entity::find().filter(order::Column::CustomerId.eq(customer_id));
        self.query_page(query, sort, page).await
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, actor: &Actor, order_id: Uuid) -> Result<OrderDetail, ServiceError> {
        actor.require_admin()?;
        let order = self.find(order_id).await?;
        load_order_detail(&*self.db, order, self.minor_units).await
    }

    /// One of the caller's own orders. Someone else's order is reported as
    /// not found.
    #[instrument(skip(self))]
    pub async fn get_customer_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<OrderDetail, ServiceError> {
        let customer_id = actor.shopper_id()?;
        let order = self.find(order_id).await?;
        if order.customer_id != customer_id {
            warn!(order_id = %order_id, "Customer requested an order they do not own");
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        load_order_detail(&*self.db, order, self.minor_units).await
    }

    /// Corrects contact and shipping fields. Items and amounts never change.
    #[instrument(skip(self, update))]
    pub async fn update_shipping_info(
        &self,
        actor: &Actor,
        order_id: Uuid,
        update: ShippingInfoUpdate,
    ) -> Result<OrderDetail, ServiceError> {
        actor.require_admin()?;
        update.validate()?;
        if update.is_empty() {
            return Err(ServiceError::ValidationError(
                "no shipping fields to update".to_string(),
            ));
        }

        let current = self.find(order_id).await?;
        let expected = update.expected_version.unwrap_or(current.version);

        let mut stmt = order::Entity::update_many()
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(name) = update.contact_name {
            stmt = stmt.col_expr(order::Column::ContactName, Expr::value(name));
        }
        if let Some(email) = update.contact_email {
            stmt = stmt.col_expr(order::Column::ContactEmail, Expr::value(email));
        }
        if let Some(phone) = update.contact_phone {
            stmt = stmt.col_expr(order::Column::ContactPhone, Expr::value(phone));
        }
        if let Some(address) = update.shipping_address {
            stmt = stmt.col_expr(order::Column::ShippingAddress, Expr::value(address));
        }

        let res = stmt
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Version.eq(expected))
            .exec(&*self.db)
            .await?;
        if res.rows_affected == 0 {
            return Err(ServiceError::PersistenceConflict {
                entity: "order",
                id: order_id,
            });
        }

        info!(order_id = %order_id, "Updated shipping info");
        let order = self.find(order_id).await?;
        load_order_detail(&*self.db, order, self.minor_units).await
    }

    async fn find(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = %order_id, "Failed to fetch order");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn query_page(
        &self,
        query: Select<order::Entity>,
        sort: OrderSort,
        page: PageRequest,
    ) -> Result<OrderPage, ServiceError> {
        if page.per_page == 0 || page.per_page > MAX_PER_PAGE {
            return Err(ServiceError::ValidationError(format!(
                "per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }
        if page.page == Some(0) {
            return Err(ServiceError::ValidationError(
                "page numbers start at 1".to_string(),
            ));
        }

        let total = query.clone().count(&*self.db).await?;

        let direction = match sort.direction {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        };
        let key_col = match sort.field {
            SortField::CreatedAt => order::Column::CreatedAt,
            SortField::Total => order::Column::TotalMinor,
        };
        let mut query = query
            .order_by(key_col, direction.clone())
            .order_by(order::Column::Id, direction);

        let page_number = match &page.cursor {
            Some(cursor) => {
                let key = CursorKey::decode(cursor)?;
                if key.sort != sort {
                    return Err(ServiceError::ValidationError(
                        "cursor was issued for a different sort order".to_string(),
                    ));
                }
                query = query.filter(key.condition());
                None
            }
            None => {
                let number = page.page.unwrap_or(1);
                let offset = (number - 1).checked_mul(page.per_page).ok_or_else(|| {
                    ServiceError::ValidationError(format!("page {} is out of range", number))
                })?;
                query = query.offset(offset);
                Some(number)
            }
        };

        let mut rows = query.limit(page.per_page + 1).all(&*self.db).await?;
        let has_more = rows.len() as u64 > page.per_page;
        rows.truncate(page.per_page as usize);

        let next_cursor = match (has_more, rows.last()) {
            (true, Some(last)) => Some(CursorKey::after(last, sort).encode()?),
            _ => None,
        };

        Ok(OrderPage {
            items: rows
                .into_iter()
                .map(|m| OrderSummary::from_model(m, self.minor_units))
                .collect(),
            total,
            page: page_number,
            per_page: page.per_page,
            next_cursor,
        })
    }
}

fn filter_condition(filter: &OrderFilter) -> Condition {
    let mut cond = Condition::all();
    if let Some(status) = filter.status {
        cond = cond.add(order::Column::Status.eq(status));
    }
    if let Some(payment_status) = filter.payment_status {
        cond = cond.add(order::Column::PaymentStatus.eq(payment_status));
    }
    if let Some(from) = filter.from {
        cond = cond.add(order::Column::CreatedAt.gte(from));
    }
    if let Some(to) = filter.to {
        cond = cond.add(order::Column::CreatedAt.lt(to));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        cond = cond.add(
            Condition::any()
                .add(order::Column::OrderNumber.like(contains_pattern(search)))
                .add(order::Column::ContactName.like(contains_pattern(search)))
                .add(order::Column::ContactEmail.like(contains_pattern(search))),
        );
    }
    cond
}

/// `%search%` with the caller's own `%`, `_` and `\` matched literally.
fn contains_pattern(search: &str) -> LikeExpr {
    LikeExpr::new(format!("%{}%", escape_like(search))).escape('\\')
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
