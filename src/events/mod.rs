use crate::entities::order::{OrderStatus, PaymentStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Domain events published after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartUpdated {
        user_id: Uuid,
        revision: i64,
    },
    CartCleared {
        user_id: Uuid,
        revision: i64,
    },

    // Order events
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        customer_id: Uuid,
        total_minor: i64,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
    },

    // Stock returned to the catalog by a cancellation
    StockReleased {
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },

    /// A paid order was cancelled; the refund is handled outside this service.
    RefundRequired {
        order_id: Uuid,
        amount_minor: i64,
    },

    /// A transaction could not be rolled back cleanly.
    IntegrityAlert {
        operation: String,
        detail: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CartUpdated { .. } => "cart_updated",
            Event::CartCleared { .. } => "cart_cleared",
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::PaymentStatusChanged { .. } => "payment_status_changed",
            Event::StockReleased { .. } => "stock_released",
            Event::RefundRequired { .. } => "refund_required",
            Event::IntegrityAlert { .. } => "integrity_alert",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// The state change the event describes has already committed.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping event");
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::counter!("storefront.events.processed", 1, "event" => event.name());

        match &event {
            Event::RefundRequired {
                order_id,
                amount_minor,
            } => {
                warn!(
                    order_id = %order_id,
                    amount_minor,
                    "Paid order cancelled; refund required"
                );
            }
            Event::IntegrityAlert { operation, detail } => {
                error!(operation = %operation, detail = %detail, "Integrity alert");
            }
            other => {
                info!(event = other.name(), "Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}
