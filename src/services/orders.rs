use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, ShippingDetails, PAYMENT_STATUS_PAID},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    gateways::payments::PaymentGateway,
    services::checkout::{delivery_method_label, payment_method_label},
    services::notifications::{OrderEmailData, OrderEmailItem},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub product_image: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub unit_price: Decimal,
    pub quantity: i32,
    /// Derived: unit price times quantity.
    pub subtotal: Decimal,
}

/// Order representation returned by the API, with shipping fields flattened
/// out of the stored shipping-details document.
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub recipient_name: String,
    pub phone: String,
    pub street: String,
    pub city: String,
    pub county: Option<String>,
    pub postal_code: String,
    pub delivery_method: String,
    pub payment_method: String,
    pub payment_status: String,
    pub fulfillment_status: String,
    pub awb_number: Option<String>,
    pub courier_shipment_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub customer_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Read and settlement paths for persisted orders.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    payments: Arc<PaymentGateway>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        payments: Arc<PaymentGateway>,
    ) -> Self {
        Self {
            db,
            event_sender,
            payments,
        }
    }

    /// Retrieves an order with its line items.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_id).await?;
        let items = self.find_items(order_id).await?;
        Self::model_to_response(order, items)
    }

    /// Lists orders, newest first, optionally scoped to one user.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
        user_id: Option<Uuid>,
    ) -> Result<OrderListResponse, ServiceError> {
        let mut query = OrderEntity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(user_id) = user_id {
            query = query.filter(order::Column::UserId.eq(user_id));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            let items = self.find_items(order.id).await?;
            responses.push(Self::model_to_response(order, items)?);
        }

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }

    /// Marks a card order as paid and kicks off notification dispatch.
    /// The caller is not trusted: the stored payment intent is fetched from
    /// the processor and must report `succeeded` before the order settles.
    /// Idempotent: confirming an already-paid order is a no-op success.
    #[instrument(skip(self))]
    pub async fn confirm_payment(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_id).await?;

        if order.payment_method != "card" {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is settled on delivery, not by card",
                order.order_number
            )));
        }

        if order.payment_status == PAYMENT_STATUS_PAID {
            info!(order_id = %order_id, "payment already confirmed");
            let items = self.find_items(order_id).await?;
            return Self::model_to_response(order, items);
        }

        let Some(intent_id) = order.payment_intent_id.as_deref() else {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} has no payment intent to confirm",
                order.order_number
            )));
        };

        let intent = self.payments.retrieve_payment_intent(intent_id).await?;
        if !intent.is_succeeded() {
            return Err(ServiceError::InvalidOperation(format!(
                "payment for order {} is not completed (intent status: {})",
                order.order_number, intent.status
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(PAYMENT_STATUS_PAID.to_string());
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&*self.db).await?;

        info!(order_id = %order_id, order_number = %updated.order_number, "payment confirmed");

        if let Err(e) = self.event_sender.send(Event::OrderCompleted(order_id)).await {
            warn!(order_id = %order_id, error = %e, "failed to send order completed event");
        }

        let items = self.find_items(order_id).await?;
        Self::model_to_response(updated, items)
    }

    /// Assembles the data structure both order emails are rendered from.
    pub async fn order_email_data(&self, order_id: Uuid) -> Result<OrderEmailData, ServiceError> {
        let order = self.find_order(order_id).await?;
        let items = self.find_items(order_id).await?;
        let details = ShippingDetails::from_json(&order.shipping_details)?;

        Ok(OrderEmailData {
            order_id: order.id,
            order_number: order.order_number,
            customer_email: order.guest_email,
            recipient_name: details.recipient_name,
            phone: details.phone,
            street: details.street,
            city: details.city,
            county: details.county,
            postal_code: details.postal_code,
            items: items
                .iter()
                .map(|item| OrderEmailItem {
                    name: item.product_name.clone(),
                    size: item.size.clone(),
                    color: item.color.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    subtotal: item.subtotal(),
                })
                .collect(),
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            total: order.total,
            currency: order.currency,
            delivery_method_label: delivery_method_label(&order.delivery_method).to_string(),
            payment_method_label: payment_method_label(&order.payment_method).to_string(),
            awb_number: details.awb_number,
            notes: order.customer_notes,
        })
    }

    async fn find_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn find_items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    fn model_to_response(
        order: order::Model,
        items: Vec<order_item::Model>,
    ) -> Result<OrderResponse, ServiceError> {
        let details = ShippingDetails::from_json(&order.shipping_details)?;

        Ok(OrderResponse {
            id: order.id,
            order_number: order.order_number,
            user_id: order.user_id,
            guest_email: order.guest_email,
            guest_phone: order.guest_phone,
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            total: order.total,
            currency: order.currency,
            recipient_name: details.recipient_name,
            phone: details.phone,
            street: details.street,
            city: details.city,
            county: details.county,
            postal_code: details.postal_code,
            delivery_method: order.delivery_method,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            fulfillment_status: order.fulfillment_status,
            awb_number: details.awb_number,
            courier_shipment_id: details.courier_shipment_id,
            payment_intent_id: order.payment_intent_id,
            customer_notes: order.customer_notes,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    id: item.id,
                    product_id: item.product_id,
                    product_name: item.product_name.clone(),
                    product_image: item.product_image.clone(),
                    size: item.size.clone(),
                    color: item.color.clone(),
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    subtotal: item.subtotal(),
                })
                .collect(),
        })
    }
}
