use crate::{
    db::DbPool,
    entities::order::{
        self, ShippingDetails, FULFILLMENT_STATUS_PENDING, PAYMENT_STATUS_PENDING,
    },
    entities::order_item,
    errors::ServiceError,
    events::{outbox, Event, EventSender},
    gateways::payments::{PaymentGateway, PaymentIntentMetadata},
    services::shipping::ShippingService,
};
use chrono::{Datelike, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, SqlErr, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Collision retries before giving up on a free order number.
const MAX_ORDER_NUMBER_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    CurierRapid,
    CurierGratuit,
    Pickup,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::CurierRapid => "curier_rapid",
            DeliveryMethod::CurierGratuit => "curier_gratuit",
            DeliveryMethod::Pickup => "pickup",
        }
    }

    /// Pickup orders never reach the courier.
    pub fn is_courier(&self) -> bool {
        !matches!(self, DeliveryMethod::Pickup)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    /// Cash on delivery.
    Ramburs,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Ramburs => "ramburs",
        }
    }

    pub fn is_card(&self) -> bool {
        matches!(self, PaymentMethod::Card)
    }
}

pub fn delivery_method_label(method: &str) -> &'static str {
    match method {
        "curier_rapid" => "Curier rapid",
        "curier_gratuit" => "Curier gratuit",
        "pickup" => "Ridicare personala",
        _ => "-",
    }
}

pub fn payment_method_label(method: &str) -> &'static str {
    match method {
        "card" => "Card online",
        "ramburs" => "Ramburs la curier",
        _ => "-",
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckoutItem {
    /// Catalog reference as sent by the storefront. Values that are not
    /// valid UUIDs are stored as null rather than rejected; the line keeps
    /// its denormalized name and price either way.
    pub product_id: Option<String>,
    pub product_name: String,
    pub product_image: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub unit_price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CheckoutRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 5, message = "Phone number is too short"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Recipient name is required"))]
    pub recipient_name: String,
    #[validate(length(min = 1, message = "Street is required"))]
    pub street: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    pub county: Option<String>,
    #[validate(length(min = 1, message = "Postal code is required"))]
    pub postal_code: String,
    pub delivery_method: DeliveryMethod,
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<CheckoutItem>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub customer_notes: Option<String>,
}

/// Outcome of a placed order, returned to the storefront.
#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub order_number: String,
    /// Present for card orders; the browser completes payment with it.
    pub client_secret: Option<String>,
    /// Present when the courier accepted the shipment inline.
    pub awb_number: Option<String>,
}

/// The order placement workflow: totals verification, atomic persistence,
/// courier shipment, payment intent, and the events that follow.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    shipping: Arc<ShippingService>,
    payments: Arc<PaymentGateway>,
    order_number_prefix: String,
    cod_fee: Decimal,
    currency: String,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        shipping: Arc<ShippingService>,
        payments: Arc<PaymentGateway>,
        order_number_prefix: String,
        cod_fee: Decimal,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            shipping,
            payments,
            order_number_prefix,
            cod_fee,
            currency,
        }
    }

    /// Places an order.
    ///
    /// The header and its line items are written in one transaction; a
    /// failure on any line leaves no trace of the order. Courier failure is
    /// non-fatal (the shipment request is queued for replay); payment intent
    /// failure is fatal to the request but the order stays on record as
    /// pending, with the failure written to the outbox for operators.
    #[instrument(skip(self, request), fields(payment_method = request.payment_method.as_str()))]
    pub async fn place_order(
        &self,
        principal: Option<Uuid>,
        request: CheckoutRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        verify_totals(&request, self.cod_fee)?;

        let order = self.persist_order(principal, &request).await?;
        info!(order_id = %order.id, order_number = %order.order_number, "order persisted");

        let awb_number = if request.delivery_method.is_courier() {
            self.create_shipment(&order).await
        } else {
            None
        };

        let client_secret = if request.payment_method.is_card() {
            Some(self.create_payment_intent(&order, &request.email).await?)
        } else {
            None
        };

        if request.payment_method == PaymentMethod::Ramburs {
            // Cash-on-delivery orders are settled from the storefront's point
            // of view as soon as they are placed.
            let _ = self
                .event_sender
                .send(Event::OrderCompleted(order.id))
                .await;
        }
        let _ = self.event_sender.send(Event::OrderCreated(order.id)).await;

        Ok(PlacedOrder {
            order_id: order.id,
            order_number: order.order_number,
            client_secret,
            awb_number,
        })
    }

    /// Writes the order header and all line items in one transaction,
    /// retrying with a fresh order number on a unique-index collision.
    async fn persist_order(
        &self,
        principal: Option<Uuid>,
        request: &CheckoutRequest,
    ) -> Result<order::Model, ServiceError> {
        for attempt in 1..=MAX_ORDER_NUMBER_ATTEMPTS {
            let order_number = generate_order_number(&self.order_number_prefix);

            match self
                .try_persist_order(principal, request, &order_number)
                .await
            {
                Ok(order) => return Ok(order),
                Err(e) if is_unique_violation(&e) => {
                    warn!(order_number, attempt, "order number collision; retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::OrderNumberExhausted(MAX_ORDER_NUMBER_ATTEMPTS))
    }

    async fn try_persist_order(
        &self,
        principal: Option<Uuid>,
        request: &CheckoutRequest,
        order_number: &str,
    ) -> Result<order::Model, sea_orm::DbErr> {
        let txn = self.db.begin().await?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let details = ShippingDetails {
            recipient_name: request.recipient_name.clone(),
            phone: request.phone.clone(),
            street: request.street.clone(),
            city: request.city.clone(),
            county: request.county.clone(),
            postal_code: request.postal_code.clone(),
            delivery_method: request.delivery_method.as_str().to_string(),
            order_number: order_number.to_string(),
            awb_number: None,
            courier_shipment_id: None,
        };

        let header = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.to_string()),
            user_id: Set(principal),
            guest_email: Set(principal.is_none().then(|| request.email.clone())),
            guest_phone: Set(principal.is_none().then(|| request.phone.clone())),
            subtotal: Set(request.subtotal),
            shipping_cost: Set(request.shipping_cost),
            total: Set(request.total),
            currency: Set(self.currency.clone()),
            shipping_details: Set(details.to_json()),
            delivery_method: Set(request.delivery_method.as_str().to_string()),
            payment_method: Set(request.payment_method.as_str().to_string()),
            payment_status: Set(PAYMENT_STATUS_PENDING.to_string()),
            fulfillment_status: Set(FULFILLMENT_STATUS_PENDING.to_string()),
            payment_intent_id: Set(None),
            customer_notes: Set(request.customer_notes.clone()),
            created_at: Set(now),
            updated_at: Set(None),
        };

        let order = header.insert(&txn).await?;

        // insert_many bypasses ActiveModelBehavior, so created_at is set here.
        let items = request.items.iter().map(|item| order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(parse_product_id(item.product_id.as_deref())),
            product_name: Set(item.product_name.clone()),
            product_image: Set(item.product_image.clone()),
            size: Set(item.size.clone()),
            color: Set(item.color.clone()),
            unit_price: Set(item.unit_price),
            quantity: Set(item.quantity),
            created_at: Set(now),
        });
        order_item::Entity::insert_many(items).exec(&txn).await?;

        txn.commit().await?;
        Ok(order)
    }

    /// Courier step. Never fails the checkout: on error the shipment request
    /// lands in the outbox and the order ships once the courier recovers.
    async fn create_shipment(&self, order: &order::Model) -> Option<String> {
        match self.shipping.create_shipment_for_order(order).await {
            Ok(shipment) => Some(shipment.awb_number),
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "courier unavailable; queuing shipment");
                let payload = json!({
                    "order_id": order.id,
                    "order_number": order.order_number,
                });
                if let Err(oe) = outbox::enqueue(
                    &*self.db,
                    "order",
                    order.id,
                    outbox::EVENT_SHIPMENT_REQUEST,
                    &payload,
                )
                .await
                {
                    tracing::error!(order_id = %order.id, error = %oe, "failed to queue shipment request");
                }
                let _ = self
                    .event_sender
                    .send(Event::ShipmentFailed {
                        order_id: order.id,
                        reason: e.to_string(),
                    })
                    .await;
                None
            }
        }
    }

    /// Payment step for card orders. Failure is surfaced to the caller, but
    /// the already-persisted order stays on record as pending, with the
    /// failure written to the outbox so operators can follow up.
    async fn create_payment_intent(
        &self,
        order: &order::Model,
        email: &str,
    ) -> Result<String, ServiceError> {
        let metadata = PaymentIntentMetadata {
            order_id: order.id,
            order_number: order.order_number.clone(),
            email: email.to_string(),
        };

        match self.payments.create_payment_intent(order.total, &metadata).await {
            Ok(intent) => {
                let mut active: order::ActiveModel = order.clone().into();
                active.payment_intent_id = Set(Some(intent.id));
                active.updated_at = Set(Some(Utc::now()));
                active.update(&*self.db).await?;
                Ok(intent.client_secret)
            }
            Err(e) => {
                let payload = json!({
                    "order_id": order.id,
                    "order_number": order.order_number,
                    "amount": order.total,
                });
                if let Err(oe) = outbox::record_failure(
                    &*self.db,
                    "order",
                    order.id,
                    outbox::EVENT_PAYMENT_INTENT_FAILED,
                    &payload,
                    &e.to_string(),
                )
                .await
                {
                    tracing::error!(order_id = %order.id, error = %oe, "failed to record payment failure");
                }
                let _ = self
                    .event_sender
                    .send(Event::PaymentIntentFailed {
                        order_id: order.id,
                        reason: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }
}

/// Checks the money invariants the storefront client is not trusted with:
/// every amount non-negative, line subtotals adding up to the order
/// subtotal, and the grand total equal to subtotal plus shipping plus the
/// cash-on-delivery fee where one applies.
pub fn verify_totals(request: &CheckoutRequest, cod_fee: Decimal) -> Result<(), ServiceError> {
    for item in &request.items {
        if item.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "item '{}' has quantity {}",
                item.product_name, item.quantity
            )));
        }
        if item.unit_price.is_sign_negative() {
            return Err(ServiceError::ValidationError(format!(
                "item '{}' has a negative price",
                item.product_name
            )));
        }
        if item.product_name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "item is missing a product name".into(),
            ));
        }
    }

    if request.subtotal.is_sign_negative()
        || request.shipping_cost.is_sign_negative()
        || request.total.is_sign_negative()
    {
        return Err(ServiceError::ValidationError(
            "amounts must be non-negative".into(),
        ));
    }

    let items_total: Decimal = request
        .items
        .iter()
        .map(|item| item.unit_price * Decimal::from(item.quantity))
        .sum();
    if items_total != request.subtotal {
        return Err(ServiceError::ValidationError(format!(
            "subtotal {} does not match item total {}",
            request.subtotal, items_total
        )));
    }

    let fee = if request.payment_method == PaymentMethod::Ramburs {
        cod_fee
    } else {
        Decimal::ZERO
    };
    let expected = request.subtotal + request.shipping_cost + fee;
    if request.total != expected {
        return Err(ServiceError::ValidationError(format!(
            "total {} does not match expected {}",
            request.total, expected
        )));
    }

    Ok(())
}

/// `{prefix}-{year}-{4 random digits}`; collisions are handled by the
/// unique index and a bounded retry.
pub fn generate_order_number(prefix: &str) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{}-{}-{:04}", prefix, Utc::now().year(), suffix)
}

/// Catalog ids that are not UUIDs (legacy slugs, test fixtures) are stored
/// as null; the denormalized line fields carry everything the order needs.
pub fn parse_product_id(raw: Option<&str>) -> Option<Uuid> {
    raw.and_then(|s| Uuid::parse_str(s).ok())
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_request() -> CheckoutRequest {
        CheckoutRequest {
            email: "maria@example.com".into(),
            phone: "+40712345678".into(),
            recipient_name: "Maria Ionescu".into(),
            street: "Str. Lunga 12".into(),
            city: "Brasov".into(),
            county: Some("Brasov".into()),
            postal_code: "500035".into(),
            delivery_method: DeliveryMethod::CurierRapid,
            payment_method: PaymentMethod::Ramburs,
            items: vec![CheckoutItem {
                product_id: Some(Uuid::new_v4().to_string()),
                product_name: "Rochie midi".into(),
                product_image: None,
                size: Some("S".into()),
                color: Some("verde".into()),
                unit_price: dec!(140),
                quantity: 2,
            }],
            subtotal: dec!(280),
            shipping_cost: dec!(20),
            total: dec!(310),
            customer_notes: None,
        }
    }

    #[test]
    fn cod_total_includes_the_fee() {
        // 280 + 20 shipping + 10 cod fee = 310
        assert!(verify_totals(&base_request(), dec!(10)).is_ok());
    }

    #[test]
    fn card_total_excludes_the_fee() {
        let mut request = base_request();
        request.payment_method = PaymentMethod::Card;
        request.total = dec!(300);
        assert!(verify_totals(&request, dec!(10)).is_ok());
    }

    #[test]
    fn mismatched_total_is_rejected() {
        let mut request = base_request();
        request.total = dec!(300);
        let err = verify_totals(&request, dec!(10)).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn subtotal_must_match_line_items() {
        let mut request = base_request();
        request.subtotal = dec!(270);
        request.total = dec!(300);
        assert!(verify_totals(&request, dec!(10)).is_err());
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut request = base_request();
        request.items[0].quantity = 0;
        assert!(verify_totals(&request, dec!(10)).is_err());
    }

    #[test]
    fn order_numbers_follow_the_expected_shape() {
        let number = generate_order_number("ORD");
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1], Utc::now().year().to_string());
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn malformed_product_ids_become_null() {
        assert_eq!(parse_product_id(Some("abc123")), None);
        assert_eq!(parse_product_id(None), None);
        let id = Uuid::new_v4();
        assert_eq!(parse_product_id(Some(&id.to_string())), Some(id));
    }

    #[test]
    fn delivery_and_payment_methods_deserialize_from_snake_case() {
        let delivery: DeliveryMethod = serde_json::from_str("\"curier_gratuit\"").unwrap();
        assert_eq!(delivery, DeliveryMethod::CurierGratuit);
        assert!(delivery.is_courier());

        let pickup: DeliveryMethod = serde_json::from_str("\"pickup\"").unwrap();
        assert!(!pickup.is_courier());

        let payment: PaymentMethod = serde_json::from_str("\"ramburs\"").unwrap();
        assert_eq!(payment, PaymentMethod::Ramburs);
        assert!(!payment.is_card());
    }
}
