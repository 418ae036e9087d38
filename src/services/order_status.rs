use crate::{
    auth::Actor,
    db::with_transaction,
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_item, order_status_history,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::release_stock,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Order status graph. `Cancelled` and `Returned` are terminal.
pub fn allowed_status_transitions(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match from {
        Pending => &[Processing, Cancelled],
        Processing => &[Shipped, Cancelled],
        Shipped => &[Delivered, Cancelled],
        Delivered => &[Returned],
        Cancelled | Returned => &[],
    }
}

/// Payment status graph. `Paid` is terminal.
pub fn allowed_payment_transitions(from: PaymentStatus) -> &'static [PaymentStatus] {
    use PaymentStatus::*;
    match from {
        Pending => &[Paid, Failed],
        Failed => &[Pending],
        Paid => &[],
    }
}

pub fn validate_status_transition(from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
    if allowed_status_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidStateTransition {
            field: "status",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

pub fn validate_payment_transition(
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<(), ServiceError> {
    if allowed_payment_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidStateTransition {
            field: "payment_status",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Result of a committed status change.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub order: order::Model,
    pub old_status: OrderStatus,
    /// Stock handed back to the catalog: `(product_id, quantity)`
    pub released: Vec<(Uuid, i32)>,
}

/// Per-order outcome of a bulk update.
#[derive(Debug)]
pub struct BulkStatusOutcome {
    pub order_id: Uuid,
    pub result: Result<order::Model, ServiceError>,
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Moves an order along the status graph.
    ///
    /// Cancelling releases the order's stock in the same transaction as the
    /// status write; cancelling a paid order also publishes `RefundRequired`.
    ///
    /// # Errors
    ///
    /// * `InvalidStateTransition` if the graph has no such edge (including `to == from`)
    /// * `PersistenceConflict` if `expected_version` is stale or a concurrent writer won
    /// * `NotFound` if the order does not exist
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        actor: &Actor,
        order_id: Uuid,
        new_status: OrderStatus,
        expected_version: Option<i32>,
    ) -> Result<order::Model, ServiceError> {
        let admin_id = actor.require_admin()?;
        let change = self
            .transition(order_id, new_status, expected_version, admin_id)
            .await?;
        self.publish(&change).await;
        Ok(change.order)
    }

    /// Applies the same target status to each order independently. One
    /// order's failure does not affect the others.
    #[instrument(skip(self, order_ids), fields(count = order_ids.len(), new_status = %new_status))]
    pub async fn batch_update_status(
        &self,
        actor: &Actor,
        order_ids: &[Uuid],
        new_status: OrderStatus,
    ) -> Result<Vec<BulkStatusOutcome>, ServiceError> {
        let admin_id = actor.require_admin()?;
        let mut outcomes = Vec::with_capacity(order_ids.len());

        for &order_id in order_ids {
            let result = match self.transition(order_id, new_status, None, admin_id).await {
                Ok(change) => {
                    self.publish(&change).await;
                    Ok(change.order)
                }
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "Bulk status update rejected");
                    Err(e)
                }
            };
            outcomes.push(BulkStatusOutcome { order_id, result });
        }

        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        info!(
            succeeded,
            failed = outcomes.len() - succeeded,
            "Bulk status update finished"
        );
        Ok(outcomes)
    }

    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_payment_status(
        &self,
        actor: &Actor,
        order_id: Uuid,
        new_status: PaymentStatus,
        expected_version: Option<i32>,
    ) -> Result<order::Model, ServiceError> {
        actor.require_admin()?;

        let (order, old_status) = with_transaction::<_, _, ServiceError>(&self.db, move |txn| {
            Box::pin(async move {
                let current = find_order(txn, order_id).await?;
                check_version(&current, expected_version)?;
                validate_payment_transition(current.payment_status, new_status)?;

                let res = order::Entity::update_many()
                    .col_expr(order::Column::PaymentStatus, Expr::value(new_status))
                    .col_expr(
                        order::Column::Version,
                        Expr::col(order::Column::Version).add(1),
                    )
                    .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(order::Column::Id.eq(order_id))
                    .filter(order::Column::Version.eq(current.version))
                    .exec(txn)
                    .await?;
                if res.rows_affected == 0 {
                    return Err(ServiceError::PersistenceConflict {
                        entity: "order",
                        id: order_id,
                    });
                }

                let updated = find_order(txn, order_id).await?;
                Ok((updated, current.payment_status))
            })
        })
        .await?;

        counter!("storefront.orders.payment_status_changed", 1);
        info!(from = %old_status, to = %new_status, "Payment status updated");
        self.event_sender
            .send_or_log(Event::PaymentStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        Ok(order)
    }

    async fn transition(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        expected_version: Option<i32>,
        changed_by: Uuid,
    ) -> Result<StatusChange, ServiceError> {
        with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                apply_status_transition(
                    txn,
                    order_id,
                    new_status,
                    expected_version,
                    Some(changed_by),
                )
                .await
            })
        })
        .await
    }

    async fn publish(&self, change: &StatusChange) {
        let order_id = change.order.id;
        counter!("storefront.orders.status_changed", 1, "to" => change.order.status.as_str());

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: change.old_status,
                new_status: change.order.status,
            })
            .await;

        for &(product_id, quantity) in &change.released {
            self.event_sender
                .send_or_log(Event::StockReleased {
                    order_id,
                    product_id,
                    quantity,
                })
                .await;
        }

        if change.order.status == OrderStatus::Cancelled
            && change.order.payment_status == PaymentStatus::Paid
        {
            warn!(order_id = %order_id, "Paid order cancelled, refund required");
            self.event_sender
                .send_or_log(Event::RefundRequired {
                    order_id,
                    amount_minor: change.order.total_minor,
                })
                .await;
        }
    }
}

async fn find_order<C: ConnectionTrait>(conn: &C, order_id: Uuid) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

fn check_version(order: &order::Model, expected_version: Option<i32>) -> Result<(), ServiceError> {
    match expected_version {
        Some(expected) if expected != order.version => Err(ServiceError::PersistenceConflict {
            entity: "order",
            id: order.id,
        }),
        _ => Ok(()),
    }
}

/// Appends a row to the order's status history.
pub async fn record_status_history<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    from_status: Option<OrderStatus>,
    to_status: OrderStatus,
    changed_by: Option<Uuid>,
) -> Result<(), ServiceError> {
    let seq = order_status_history::Entity::find()
        .filter(order_status_history::Column::OrderId.eq(order_id))
        .count(conn)
        .await? as i32
        + 1;

    let row = order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        seq: Set(seq),
        from_status: Set(from_status),
        to_status: Set(to_status),
        changed_by: Set(changed_by),
        changed_at: Set(Utc::now()),
    };
    order_status_history::Entity::insert(row)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

/// Validates and writes one status transition on `conn`. The caller owns the
/// transaction boundary.
pub async fn apply_status_transition<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    new_status: OrderStatus,
    expected_version: Option<i32>,
    changed_by: Option<Uuid>,
) -> Result<StatusChange, ServiceError> {
    let current = find_order(conn, order_id).await?;
    check_version(&current, expected_version)?;
    validate_status_transition(current.status, new_status)?;

    let res = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(new_status))
        .col_expr(
            order::Column::Version,
            Expr::col(order::Column::Version).add(1),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Version.eq(current.version))
        .exec(conn)
        .await?;
    if res.rows_affected == 0 {
        return Err(ServiceError::PersistenceConflict {
            entity: "order",
            id: order_id,
        });
    }

    record_status_history(conn, order_id, Some(current.status), new_status, changed_by).await?;

    let mut released = Vec::new();
    if new_status == OrderStatus::Cancelled {
        let mut lines = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;
        // Same row lock order as checkout reservations.
        lines.sort_by_key(|line| line.product_id);
        for line in lines {
            if release_stock(conn, line.product_id, line.quantity).await? {
                released.push((line.product_id, line.quantity));
            } else {
                error!(
                    order_id = %order_id,
                    product_id = %line.product_id,
                    "Cancelled order references a product no longer in the catalog"
                );
            }
        }
    }

    let order = find_order(conn, order_id).await?;
    info!(order_id = %order_id, from = %current.status, to = %new_status, "Order status updated");
    Ok(StatusChange {
        order,
        old_status: current.status,
        released,
    })
}
