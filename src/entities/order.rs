use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Lifecycle states an order moves through. Stored as plain strings so the
/// account and admin surfaces can extend them without a migration.
pub const PAYMENT_STATUS_PENDING: &str = "pending";
pub const PAYMENT_STATUS_PAID: &str = "paid";
pub const FULFILLMENT_STATUS_PENDING: &str = "pending";
pub const FULFILLMENT_STATUS_CONFIRMED: &str = "confirmed";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-facing order number; unique, generated with retry-on-collision.
    pub order_number: String,

    /// Null for guest checkout.
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,

    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub currency: String,

    /// Free-form shipping document; see [`ShippingDetails`].
    pub shipping_details: Json,

    pub delivery_method: String,
    pub payment_method: String,
    pub payment_status: String,
    pub fulfillment_status: String,

    /// Null until a card payment intent is created.
    pub payment_intent_id: Option<String>,
    pub customer_notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}

/// Shipping document embedded in the order row. Courier identifiers are
/// merged in after a successful shipment call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub recipient_name: String,
    pub phone: String,
    pub street: String,
    pub city: String,
    pub county: Option<String>,
    pub postal_code: String,
    pub delivery_method: String,
    pub order_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awb_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub courier_shipment_id: Option<String>,
}

impl ShippingDetails {
    pub fn from_json(value: &Json) -> Result<Self, ServiceError> {
        serde_json::from_value(value.clone()).map_err(|e| {
            ServiceError::InternalError(format!("corrupt shipping details document: {}", e))
        })
    }

    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).expect("shipping details serialize to plain JSON")
    }
}
