use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, ShippingDetails, FULFILLMENT_STATUS_CONFIRMED},
    errors::ServiceError,
    events::{Event, EventSender},
    gateways::courier::{CourierClient, CourierShipment, ShipmentOrder},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Orchestrates courier shipments for placed orders: the inline call during
/// checkout and outbox-driven replays both land here.
#[derive(Clone)]
pub struct ShippingService {
    db: Arc<DbPool>,
    courier: Arc<CourierClient>,
    event_sender: Arc<EventSender>,
}

impl ShippingService {
    pub fn new(db: Arc<DbPool>, courier: Arc<CourierClient>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db,
            courier,
            event_sender,
        }
    }

    /// Creates a courier shipment for an order, merges the returned
    /// identifiers into its shipping document and advances fulfillment to
    /// `confirmed`.
    #[instrument(skip(self, order), fields(order_id = %order.id, order_number = %order.order_number))]
    pub async fn create_shipment_for_order(
        &self,
        order: &order::Model,
    ) -> Result<CourierShipment, ServiceError> {
        let mut details = ShippingDetails::from_json(&order.shipping_details)?;

        let shipment_order = ShipmentOrder {
            recipient_name: details.recipient_name.clone(),
            phone: details.phone.clone(),
            street: details.street.clone(),
            city: details.city.clone(),
            order_number: order.order_number.clone(),
            total: order.total,
            cash_on_delivery: order.payment_method == "ramburs",
            parcel_count: 1,
        };

        let shipment = self.courier.create_shipment(&shipment_order).await?;

        details.awb_number = Some(shipment.awb_number.clone());
        details.courier_shipment_id = Some(shipment.shipment_id.clone());

        let mut active: order::ActiveModel = order.clone().into();
        active.shipping_details = Set(details.to_json());
        active.fulfillment_status = Set(FULFILLMENT_STATUS_CONFIRMED.to_string());
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;

        info!(awb = %shipment.awb_number, "shipment created and order confirmed");

        let _ = self
            .event_sender
            .send(Event::ShipmentCreated {
                order_id: order.id,
                awb_number: shipment.awb_number.clone(),
            })
            .await;

        Ok(shipment)
    }

    /// Replays a failed shipment request. Idempotent: an order that already
    /// carries courier identifiers is returned as-is.
    #[instrument(skip(self))]
    pub async fn retry_shipment(&self, order_id: Uuid) -> Result<CourierShipment, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let details = ShippingDetails::from_json(&order.shipping_details)?;
        if let (Some(awb_number), Some(shipment_id)) =
            (details.awb_number.clone(), details.courier_shipment_id.clone())
        {
            return Ok(CourierShipment {
                shipment_id,
                parcel_ids: vec![awb_number.clone()],
                awb_number,
            });
        }

        self.create_shipment_for_order(&order).await
    }

    /// Fetches the printable label for an order's parcel, for manual
    /// printing. `None` when the order has no shipment yet or the courier
    /// declines.
    #[instrument(skip(self))]
    pub async fn shipment_label(&self, order_id: Uuid) -> Result<Option<String>, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let details = ShippingDetails::from_json(&order.shipping_details)?;
        let Some(awb_number) = details.awb_number else {
            return Ok(None);
        };

        Ok(self.courier.fetch_label(&[awb_number]).await)
    }
}
