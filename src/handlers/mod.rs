use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    gateways::{courier::CourierClient, mailer::MailerClient, payments::PaymentGateway},
    services::{
        checkout::CheckoutService, notifications::NotificationService, orders::OrderService,
        shipping::ShippingService,
    },
    AppState,
};
use axum::Router;
use std::sync::Arc;

pub mod checkout;
pub mod common;
pub mod orders;

/// All services, wired once at startup and shared through [`AppState`].
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub shipping: Arc<ShippingService>,
    pub notifications: Arc<NotificationService>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, cfg: &AppConfig) -> Self {
        let courier = Arc::new(CourierClient::new(cfg.courier.clone()));
        let payments = Arc::new(PaymentGateway::new(cfg.payment.clone()));
        let mailer = Arc::new(MailerClient::new(cfg.email.clone()));

        let shipping = Arc::new(ShippingService::new(
            db.clone(),
            courier,
            event_sender.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            payments.clone(),
        ));
        let notifications = Arc::new(NotificationService::new(db.clone(), mailer));
        let checkout = Arc::new(CheckoutService::new(
            db,
            event_sender,
            shipping.clone(),
            payments,
            cfg.order_number_prefix.clone(),
            cfg.cod_fee,
            cfg.currency.clone(),
        ));

        Self {
            checkout,
            orders,
            shipping,
            notifications,
        }
    }
}

/// Routes under `/api/v1`.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/checkout", checkout::routes())
        .nest("/orders", orders::routes())
}
