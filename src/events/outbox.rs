use crate::db::DbPool;
use crate::entities::outbox_message::{self, Entity as OutboxEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const EVENT_SHIPMENT_REQUEST: &str = "shipment_request";
pub const EVENT_ORDER_EMAILS: &str = "order_emails";
pub const EVENT_PAYMENT_INTENT_FAILED: &str = "payment_intent_failed";

pub const MAX_ATTEMPTS: i32 = 8;
const POLL_INTERVAL: Duration = Duration::from_secs(30);
const BATCH_SIZE: u64 = 20;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_DELIVERED: &str = "delivered";
pub const STATUS_FAILED: &str = "failed";

/// Enqueues a replayable side effect. The worker picks it up on its next
/// pass.
pub async fn enqueue(
    db: &impl ConnectionTrait,
    aggregate_type: &str,
    aggregate_id: Uuid,
    event_type: &str,
    payload: &Value,
) -> Result<(), ServiceError> {
    insert_message(db, aggregate_type, aggregate_id, event_type, payload, STATUS_PENDING, None)
        .await
}

/// Records a terminally failed side effect for operator inspection. Never
/// retried by the worker.
pub async fn record_failure(
    db: &impl ConnectionTrait,
    aggregate_type: &str,
    aggregate_id: Uuid,
    event_type: &str,
    payload: &Value,
    error: &str,
) -> Result<(), ServiceError> {
    insert_message(
        db,
        aggregate_type,
        aggregate_id,
        event_type,
        payload,
        STATUS_FAILED,
        Some(error),
    )
    .await
}

async fn insert_message(
    db: &impl ConnectionTrait,
    aggregate_type: &str,
    aggregate_id: Uuid,
    event_type: &str,
    payload: &Value,
    status: &str,
    last_error: Option<&str>,
) -> Result<(), ServiceError> {
    let id = Uuid::new_v4();
    let message = outbox_message::ActiveModel {
        id: Set(id),
        aggregate_type: Set(aggregate_type.to_string()),
        aggregate_id: Set(aggregate_id),
        event_type: Set(event_type.to_string()),
        payload: Set(payload.clone()),
        status: Set(status.to_string()),
        attempts: Set(0),
        last_error: Set(last_error.map(str::to_string)),
        created_at: Set(Utc::now()),
        processed_at: Set(None),
    };

    message.insert(db).await?;
    info!(
        outbox_id = %id,
        %aggregate_id,
        event_type,
        status,
        "outbox message recorded"
    );
    Ok(())
}

/// Spawns the polling worker. Claims pending messages, re-emits them on the
/// event channel, and leaves delivery bookkeeping to the event loop.
pub fn start_worker(db: Arc<DbPool>, sender: EventSender) {
    tokio::spawn(async move {
        loop {
            match drain_once(&db, &sender, BATCH_SIZE).await {
                Ok(claimed) if claimed > 0 => {
                    debug!(claimed, "outbox messages dispatched for replay");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "outbox worker pass failed"),
            }
            sleep(POLL_INTERVAL).await;
        }
    });
}

/// One worker pass: claim up to `batch` pending messages and re-emit them as
/// retry events. Returns how many were claimed.
pub async fn drain_once(
    db: &DbPool,
    sender: &EventSender,
    batch: u64,
) -> Result<usize, ServiceError> {
    let pending = OutboxEntity::find()
        .filter(outbox_message::Column::Status.eq(STATUS_PENDING))
        .filter(outbox_message::Column::Attempts.lt(MAX_ATTEMPTS))
        .order_by_asc(outbox_message::Column::CreatedAt)
        .limit(batch)
        .all(db)
        .await?;

    let mut claimed = 0usize;
    for message in pending {
        let outbox_id = message.id;
        let order_id = message.aggregate_id;
        let attempts = message.attempts;

        let event = match message.event_type.as_str() {
            EVENT_SHIPMENT_REQUEST => Event::ShipmentRetryRequested {
                outbox_id,
                order_id,
            },
            EVENT_ORDER_EMAILS => Event::EmailRetryRequested {
                outbox_id,
                order_id,
            },
            other => {
                debug!(outbox_id = %outbox_id, event_type = other, "no replay handler; skipping");
                continue;
            }
        };

        let mut active: outbox_message::ActiveModel = message.into();
        active.status = Set(STATUS_PROCESSING.to_string());
        active.attempts = Set(attempts + 1);
        active.update(db).await?;

        if sender.send(event).await.is_err() {
            // Channel closed (shutdown); put the message back for the next run.
            let revert = outbox_message::ActiveModel {
                id: Set(outbox_id),
                status: Set(STATUS_PENDING.to_string()),
                ..Default::default()
            };
            if let Err(e) = OutboxEntity::update(revert).exec(db).await {
                warn!(outbox_id = %outbox_id, error = %e, "failed to revert outbox claim");
            }
            break;
        }

        claimed += 1;
    }

    Ok(claimed)
}

/// Marks a replayed message as delivered.
pub async fn mark_delivered(db: &DbPool, outbox_id: Uuid) {
    let update = outbox_message::ActiveModel {
        id: Set(outbox_id),
        status: Set(STATUS_DELIVERED.to_string()),
        last_error: Set(None),
        processed_at: Set(Some(Utc::now())),
        ..Default::default()
    };
    if let Err(e) = OutboxEntity::update(update).exec(db).await {
        warn!(%outbox_id, error = %e, "failed to mark outbox message delivered");
    }
}

/// Puts a message back in `pending` after a failed replay, or marks it
/// `failed` once attempts are exhausted.
pub async fn reschedule(db: &DbPool, outbox_id: Uuid, error: &str) {
    let current = match OutboxEntity::find_by_id(outbox_id).one(db).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            warn!(%outbox_id, "outbox message vanished before reschedule");
            return;
        }
        Err(e) => {
            warn!(%outbox_id, error = %e, "failed to load outbox message for reschedule");
            return;
        }
    };

    let exhausted = current.attempts >= MAX_ATTEMPTS;
    let mut active: outbox_message::ActiveModel = current.into();
    active.status = Set(if exhausted {
        STATUS_FAILED.to_string()
    } else {
        STATUS_PENDING.to_string()
    });
    active.last_error = Set(Some(error.to_string()));
    if exhausted {
        active.processed_at = Set(Some(Utc::now()));
    }

    if let Err(e) = active.update(db).await {
        warn!(%outbox_id, error = %e, "failed to reschedule outbox message");
    }
}
