use crate::config::AppConfig;
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend};
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            ..Default::default()
        }
    }
}

/// Establishes a connection pool to the database.
pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };
    establish_connection_with_config(&config).await
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&DbConfig::from(cfg)).await
}

pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("configuring database connection: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    let db_pool = Database::connect(opt).await?;

    info!(
        max_connections = config.max_connections,
        "database connection pool established"
    );

    Ok(db_pool)
}

/// Creates the schema if it does not exist. Idempotent; runs on startup when
/// `auto_migrate` is set, and in the test suite against SQLite.
pub async fn run_migrations(db: &DbPool) -> Result<(), ServiceError> {
    let statements: &[&str] = match db.get_database_backend() {
        DbBackend::Postgres => &[
            r#"CREATE TABLE IF NOT EXISTS orders (
                id UUID PRIMARY KEY,
                order_number VARCHAR(32) NOT NULL,
                user_id UUID,
                guest_email VARCHAR(255),
                guest_phone VARCHAR(64),
                subtotal NUMERIC(12,2) NOT NULL,
                shipping_cost NUMERIC(12,2) NOT NULL,
                total NUMERIC(12,2) NOT NULL,
                currency VARCHAR(8) NOT NULL,
                shipping_details JSONB NOT NULL,
                delivery_method VARCHAR(32) NOT NULL,
                payment_method VARCHAR(32) NOT NULL,
                payment_status VARCHAR(32) NOT NULL,
                fulfillment_status VARCHAR(32) NOT NULL,
                payment_intent_id VARCHAR(255),
                customer_notes TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ
            )"#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_order_number ON orders(order_number)",
            r#"CREATE TABLE IF NOT EXISTS order_items (
                id UUID PRIMARY KEY,
                order_id UUID NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                product_id UUID,
                product_name VARCHAR(255) NOT NULL,
                product_image TEXT,
                size VARCHAR(32),
                color VARCHAR(64),
                unit_price NUMERIC(12,2) NOT NULL,
                quantity INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_order_items_order_id ON order_items(order_id)",
            r#"CREATE TABLE IF NOT EXISTS outbox_messages (
                id UUID PRIMARY KEY,
                aggregate_type VARCHAR(32) NOT NULL,
                aggregate_id UUID NOT NULL,
                event_type VARCHAR(64) NOT NULL,
                payload JSONB NOT NULL,
                status VARCHAR(16) NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                processed_at TIMESTAMPTZ
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox_messages(status, created_at)",
        ],
        _ => &[
            r#"CREATE TABLE IF NOT EXISTS orders (
                id BLOB PRIMARY KEY,
                order_number TEXT NOT NULL,
                user_id BLOB,
                guest_email TEXT,
                guest_phone TEXT,
                subtotal REAL NOT NULL,
                shipping_cost REAL NOT NULL,
                total REAL NOT NULL,
                currency TEXT NOT NULL,
                shipping_details TEXT NOT NULL,
                delivery_method TEXT NOT NULL,
                payment_method TEXT NOT NULL,
                payment_status TEXT NOT NULL,
                fulfillment_status TEXT NOT NULL,
                payment_intent_id TEXT,
                customer_notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT
            )"#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_order_number ON orders(order_number)",
            r#"CREATE TABLE IF NOT EXISTS order_items (
                id BLOB PRIMARY KEY,
                order_id BLOB NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                product_id BLOB,
                product_name TEXT NOT NULL,
                product_image TEXT,
                size TEXT,
                color TEXT,
                unit_price REAL NOT NULL,
                quantity INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_order_items_order_id ON order_items(order_id)",
            r#"CREATE TABLE IF NOT EXISTS outbox_messages (
                id BLOB PRIMARY KEY,
                aggregate_type TEXT NOT NULL,
                aggregate_id BLOB NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                processed_at TEXT
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox_messages(status, created_at)",
        ],
    };

    for sql in statements {
        db.execute_unprepared(sql).await?;
    }

    info!("database schema is up to date");
    Ok(())
}
