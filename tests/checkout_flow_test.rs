use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use storefront_api::{
    config::{AppConfig, CourierConfig, EmailConfig, PaymentConfig},
    db::{self, DbConfig, DbPool},
    entities::{order, order_item, outbox_message},
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::AppServices,
    services::checkout::{CheckoutItem, CheckoutRequest, DeliveryMethod, PaymentMethod},
};
use tokio::sync::mpsc;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestApp {
    db: Arc<DbPool>,
    services: AppServices,
    // Keeps the event channel open; sends would fail with a dropped receiver.
    _rx: mpsc::Receiver<Event>,
}

fn test_config(courier_url: &str, payment_url: &str, email_url: &str) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 0,
        environment: "test".into(),
        log_level: "warn".into(),
        log_json: false,
        auto_migrate: false,
        jwt_secret: None,
        order_number_prefix: "ORD".into(),
        currency: "RON".into(),
        cod_fee: dec!(10),
        cors_allowed_origins: None,
        db_max_connections: 1,
        db_min_connections: 1,
        courier: CourierConfig {
            base_url: courier_url.into(),
            username: "shop".into(),
            password: "secret".into(),
            country_id: 642,
            service_id: 2505,
            pickup_cutoff_hour: 15,
        },
        payment: PaymentConfig {
            base_url: payment_url.into(),
            secret_key: "sk_test_123".into(),
            currency: "ron".into(),
        },
        email: EmailConfig {
            base_url: email_url.into(),
            api_key: "re_test_123".into(),
            from_address: "shop@example.com".into(),
            owner_email: "owner@example.com".into(),
        },
    }
}

async fn setup(courier_url: &str, payment_url: &str) -> TestApp {
    let cfg = test_config(courier_url, payment_url, "http://127.0.0.1:1");

    // A single connection so every statement sees the same in-memory database.
    let db_config = DbConfig {
        url: cfg.database_url.clone(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let db = Arc::new(
        db::establish_connection_with_config(&db_config)
            .await
            .expect("connect"),
    );
    db::run_migrations(&db).await.expect("migrate");

    let (tx, rx) = mpsc::channel(64);
    let event_sender = Arc::new(EventSender::new(tx));
    let services = AppServices::new(db.clone(), event_sender, &cfg);

    TestApp {
        db,
        services,
        _rx: rx,
    }
}

async fn mount_courier_happy_path(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/location/site"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sites": [{ "id": 642001 }]
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/shipment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "5001",
            "parcels": [{ "id": "80400001" }]
        })))
        .mount(server)
        .await;
}

fn cod_request() -> CheckoutRequest {
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
        items: vec![
            CheckoutItem {
                product_id: Some(Uuid::new_v4().to_string()),
                product_name: "Rochie midi".into(),
                product_image: None,
                size: Some("S".into()),
                color: Some("verde".into()),
                unit_price: dec!(140),
                quantity: 1,
            },
            CheckoutItem {
                product_id: Some(Uuid::new_v4().to_string()),
                product_name: "Camasa in".into(),
                product_image: None,
                size: Some("M".into()),
                color: None,
                unit_price: dec!(140),
                quantity: 1,
            },
        ],
        subtotal: dec!(280),
        shipping_cost: dec!(20),
        // 280 + 20 shipping + 10 cash-on-delivery fee
        total: dec!(310),
        customer_notes: None,
    }
}

fn card_pickup_request() -> CheckoutRequest {
    CheckoutRequest {
        delivery_method: DeliveryMethod::Pickup,
        payment_method: PaymentMethod::Card,
        shipping_cost: dec!(0),
        total: dec!(280),
        ..cod_request()
    }
}

#[tokio::test]
async fn cod_checkout_persists_order_and_creates_shipment() {
    let courier = MockServer::start().await;
    mount_courier_happy_path(&courier).await;
    let app = setup(&courier.uri(), "http://127.0.0.1:1").await;

    let placed = app
        .services
        .checkout
        .place_order(None, cod_request())
        .await
        .expect("checkout");

    assert_eq!(placed.awb_number.as_deref(), Some("80400001"));
    assert!(placed.client_secret.is_none());
    assert!(placed.order_number.starts_with("ORD-"));

    let order = app
        .services
        .orders
        .get_order(placed.order_id)
        .await
        .expect("read back");
    assert_eq!(order.payment_status, "pending");
    assert_eq!(order.fulfillment_status, "confirmed");
    assert_eq!(order.awb_number.as_deref(), Some("80400001"));
    assert_eq!(order.courier_shipment_id.as_deref(), Some("5001"));
    assert_eq!(order.total, dec!(310));
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.guest_email.as_deref(), Some("maria@example.com"));
}

#[tokio::test]
async fn courier_outage_is_not_fatal_and_queues_a_replay() {
    let courier = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/location/site"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&courier)
        .await;
    let app = setup(&courier.uri(), "http://127.0.0.1:1").await;

    let placed = app
        .services
        .checkout
        .place_order(None, cod_request())
        .await
        .expect("checkout still succeeds");

    assert!(placed.awb_number.is_none());

    let order = app
        .services
        .orders
        .get_order(placed.order_id)
        .await
        .unwrap();
    assert_eq!(order.fulfillment_status, "pending");
    assert!(order.awb_number.is_none());

    let queued = outbox_message::Entity::find()
        .filter(outbox_message::Column::AggregateId.eq(placed.order_id))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].event_type, "shipment_request");
    assert_eq!(queued[0].status, "pending");
}

#[tokio::test]
async fn card_checkout_returns_a_client_secret() {
    let payments = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(body_string_contains("amount=28000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "pi_123",
            "client_secret": "pi_123_secret_abc"
        })))
        .mount(&payments)
        .await;
    let app = setup("http://127.0.0.1:1", &payments.uri()).await;

    let placed = app
        .services
        .checkout
        .place_order(None, card_pickup_request())
        .await
        .expect("checkout");

    assert_eq!(placed.client_secret.as_deref(), Some("pi_123_secret_abc"));
    assert!(placed.awb_number.is_none());

    let order = app
        .services
        .orders
        .get_order(placed.order_id)
        .await
        .unwrap();
    assert_eq!(order.payment_intent_id.as_deref(), Some("pi_123"));
    assert_eq!(order.payment_status, "pending");
}

#[tokio::test]
async fn payment_failure_is_fatal_but_the_order_stays_on_record() {
    let payments = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
            "error": { "message": "Your card was declined." }
        })))
        .mount(&payments)
        .await;
    let app = setup("http://127.0.0.1:1", &payments.uri()).await;

    let err = app
        .services
        .checkout
        .place_order(None, card_pickup_request())
        .await
        .expect_err("payment failure surfaces");
    assert!(matches!(err, ServiceError::PaymentError(_)));
    assert!(err.to_string().contains("declined"));

    let orders = order::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payment_status, "pending");
    assert!(orders[0].payment_intent_id.is_none());

    let recorded = outbox_message::Entity::find()
        .filter(outbox_message::Column::AggregateId.eq(orders[0].id))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].event_type, "payment_intent_failed");
    assert_eq!(recorded[0].status, "failed");
    assert!(recorded[0].last_error.is_some());
}

#[tokio::test]
async fn failed_item_insert_rolls_back_the_whole_order() {
    let courier = MockServer::start().await;
    mount_courier_happy_path(&courier).await;
    let app = setup(&courier.uri(), "http://127.0.0.1:1").await;

    // Force the line-item insert to fail after the header insert succeeded.
    use sea_orm::ConnectionTrait;
    app.db
        .execute_unprepared("DROP TABLE order_items")
        .await
        .unwrap();

    let err = app
        .services
        .checkout
        .place_order(None, cod_request())
        .await
        .expect_err("item insert fails");
    assert!(matches!(err, ServiceError::DatabaseError(_)));

    let orders = order::Entity::find().all(&*app.db).await.unwrap();
    assert!(orders.is_empty(), "header must roll back with the items");
}

#[tokio::test]
async fn malformed_product_ids_are_stored_as_null() {
    let courier = MockServer::start().await;
    mount_courier_happy_path(&courier).await;
    let app = setup(&courier.uri(), "http://127.0.0.1:1").await;

    let mut request = cod_request();
    request.items.truncate(1);
    request.items[0].product_id = Some("legacy-slug-123".into());
    request.items[0].quantity = 2;
    request.subtotal = dec!(280);

    let placed = app
        .services
        .checkout
        .place_order(None, request)
        .await
        .expect("checkout");

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(placed.order_id))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0].product_id.is_none());
    assert_eq!(items[0].product_name, "Rochie midi");
    assert_eq!(items[0].quantity, 2);
}

#[tokio::test]
async fn double_submit_places_two_distinct_orders() {
    let courier = MockServer::start().await;
    mount_courier_happy_path(&courier).await;
    let app = setup(&courier.uri(), "http://127.0.0.1:1").await;

    let first = app
        .services
        .checkout
        .place_order(None, cod_request())
        .await
        .unwrap();
    let second = app
        .services
        .checkout
        .place_order(None, cod_request())
        .await
        .unwrap();

    assert_ne!(first.order_id, second.order_id);
    assert_ne!(first.order_number, second.order_number);

    let orders = order::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(orders.len(), 2);
}

#[tokio::test]
async fn authenticated_checkout_skips_guest_contact_columns() {
    let courier = MockServer::start().await;
    mount_courier_happy_path(&courier).await;
    let app = setup(&courier.uri(), "http://127.0.0.1:1").await;

    let user_id = Uuid::new_v4();
    let placed = app
        .services
        .checkout
        .place_order(Some(user_id), cod_request())
        .await
        .unwrap();

    let order = order::Entity::find_by_id(placed.order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.user_id, Some(user_id));
    assert!(order.guest_email.is_none());
    assert!(order.guest_phone.is_none());
}

#[tokio::test]
async fn invalid_totals_are_rejected_before_anything_is_written() {
    let app = setup("http://127.0.0.1:1", "http://127.0.0.1:1").await;

    let mut request = cod_request();
    request.total = dec!(300); // forgets the cash-on-delivery fee

    let err = app
        .services
        .checkout
        .place_order(None, request)
        .await
        .expect_err("totals mismatch");
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let orders = order::Entity::find().all(&*app.db).await.unwrap();
    assert!(orders.is_empty());
}

#[tokio::test]
async fn confirm_payment_settles_card_orders_idempotently() {
    let payments = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "pi_456",
            "client_secret": "pi_456_secret"
        })))
        .mount(&payments)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "pi_456",
            "status": "succeeded"
        })))
        .mount(&payments)
        .await;
    let app = setup("http://127.0.0.1:1", &payments.uri()).await;

    let placed = app
        .services
        .checkout
        .place_order(None, card_pickup_request())
        .await
        .unwrap();

    let confirmed = app
        .services
        .orders
        .confirm_payment(placed.order_id)
        .await
        .unwrap();
    assert_eq!(confirmed.payment_status, "paid");

    // Second confirmation is a no-op success.
    let again = app
        .services
        .orders
        .confirm_payment(placed.order_id)
        .await
        .unwrap();
    assert_eq!(again.payment_status, "paid");
}

#[tokio::test]
async fn confirm_payment_refuses_an_intent_the_processor_has_not_settled() {
    let payments = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "pi_789",
            "client_secret": "pi_789_secret"
        })))
        .mount(&payments)
        .await;
    // The customer never completed card collection.
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "pi_789",
            "status": "requires_payment_method"
        })))
        .mount(&payments)
        .await;
    let app = setup("http://127.0.0.1:1", &payments.uri()).await;

    let placed = app
        .services
        .checkout
        .place_order(None, card_pickup_request())
        .await
        .unwrap();

    let err = app
        .services
        .orders
        .confirm_payment(placed.order_id)
        .await
        .expect_err("unsettled intent must not confirm");
    assert!(matches!(err, ServiceError::InvalidOperation(_)));

    let order = app
        .services
        .orders
        .get_order(placed.order_id)
        .await
        .unwrap();
    assert_eq!(order.payment_status, "pending");
}

#[tokio::test]
async fn confirm_payment_rejects_cash_on_delivery_orders() {
    let courier = MockServer::start().await;
    mount_courier_happy_path(&courier).await;
    let app = setup(&courier.uri(), "http://127.0.0.1:1").await;

    let placed = app
        .services
        .checkout
        .place_order(None, cod_request())
        .await
        .unwrap();

    let err = app
        .services
        .orders
        .confirm_payment(placed.order_id)
        .await
        .expect_err("cash on delivery has no card confirmation");
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn listing_scopes_to_the_requesting_user() {
    let courier = MockServer::start().await;
    mount_courier_happy_path(&courier).await;
    let app = setup(&courier.uri(), "http://127.0.0.1:1").await;

    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();
    app.services
        .checkout
        .place_order(Some(user_a), cod_request())
        .await
        .unwrap();
    app.services
        .checkout
        .place_order(Some(user_b), cod_request())
        .await
        .unwrap();

    let list = app
        .services
        .orders
        .list_orders(1, 20, Some(user_a))
        .await
        .unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.orders.len(), 1);
    assert_eq!(list.orders[0].user_id, Some(user_a));
}
