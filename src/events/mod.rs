use crate::db::DbPool;
use crate::services::notifications::NotificationService;
use crate::services::orders::OrderService;
use crate::services::shipping::ShippingService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod outbox;

/// Events emitted while placing and settling orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    /// Order is settled from the storefront's point of view: placed with
    /// cash-on-delivery, or card payment confirmed. Drives notification
    /// dispatch.
    OrderCompleted(Uuid),
    ShipmentCreated {
        order_id: Uuid,
        awb_number: String,
    },
    ShipmentFailed {
        order_id: Uuid,
        reason: String,
    },
    PaymentIntentFailed {
        order_id: Uuid,
        reason: String,
    },
    /// Replay of a failed shipment request, claimed from the outbox.
    ShipmentRetryRequested {
        outbox_id: Uuid,
        order_id: Uuid,
    },
    /// Replay of failed order emails, claimed from the outbox.
    EmailRetryRequested {
        outbox_id: Uuid,
        order_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("failed to send event: {}", e))
    }
}

/// Services the event loop needs to act on events.
#[derive(Clone)]
pub struct EventContext {
    pub db: Arc<DbPool>,
    pub orders: Arc<OrderService>,
    pub shipping: Arc<ShippingService>,
    pub notifications: Arc<NotificationService>,
}

/// Consumes the in-process event channel. Notification dispatch and outbox
/// replays run here, off the request path.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, ctx: EventContext) {
    info!("starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCompleted(order_id) => match ctx.orders.order_email_data(order_id).await {
                Ok(data) => ctx.notifications.dispatch_order_emails(&data).await,
                Err(e) => error!(%order_id, error = %e, "failed to assemble order email data"),
            },
            Event::ShipmentRetryRequested {
                outbox_id,
                order_id,
            } => match ctx.shipping.retry_shipment(order_id).await {
                Ok(shipment) => {
                    info!(%order_id, awb = %shipment.awb_number, "shipment replay succeeded");
                    outbox::mark_delivered(&ctx.db, outbox_id).await;
                }
                Err(e) => {
                    warn!(%order_id, error = %e, "shipment replay failed");
                    outbox::reschedule(&ctx.db, outbox_id, &e.to_string()).await;
                }
            },
            Event::EmailRetryRequested {
                outbox_id,
                order_id,
            } => {
                let result = match ctx.orders.order_email_data(order_id).await {
                    Ok(data) => ctx.notifications.send_order_emails(&data).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => outbox::mark_delivered(&ctx.db, outbox_id).await,
                    Err(e) => {
                        warn!(%order_id, error = %e, "email replay failed");
                        outbox::reschedule(&ctx.db, outbox_id, &e.to_string()).await;
                    }
                }
            }
            Event::OrderCreated(order_id) => {
                info!(%order_id, "order created");
            }
            Event::ShipmentCreated {
                order_id,
                awb_number,
            } => {
                info!(%order_id, awb = %awb_number, "shipment created");
            }
            Event::ShipmentFailed { order_id, reason } => {
                warn!(%order_id, %reason, "shipment creation failed; queued for replay");
            }
            Event::PaymentIntentFailed { order_id, reason } => {
                warn!(%order_id, %reason, "payment intent creation failed");
            }
        }
    }

    info!("event processing loop stopped");
}
