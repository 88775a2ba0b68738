use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Courier (shipping gateway) configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CourierConfig {
    /// Base URL of the courier REST API
    pub base_url: String,

    #[validate(length(min = 1))]
    pub username: String,

    #[validate(length(min = 1))]
    pub password: String,

    /// Courier-internal id of the destination country
    #[serde(default = "default_country_id")]
    pub country_id: i64,

    /// Courier service id used for every shipment
    #[serde(default = "default_service_id")]
    pub service_id: i64,

    /// Same-day pickup is requested before this hour (courier local time)
    #[serde(default = "default_pickup_cutoff_hour")]
    pub pickup_cutoff_hour: u32,
}

/// Payment processor configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaymentConfig {
    #[serde(default = "default_payment_base_url")]
    pub base_url: String,

    #[validate(length(min = 1))]
    pub secret_key: String,

    /// ISO currency code, lowercase, as the processor expects it
    #[serde(default = "default_currency_code")]
    pub currency: String,
}

/// Transactional email provider configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct EmailConfig {
    #[serde(default = "default_email_base_url")]
    pub base_url: String,

    #[validate(length(min = 1))]
    pub api_key: String,

    /// Sender address for both owner and customer emails
    #[validate(email)]
    pub from_address: String,

    /// Where the owner-facing order summary is delivered
    #[validate(email)]
    pub owner_email: String,
}

/// Application configuration, loaded from `config/*.toml` plus
/// `APP__`-prefixed environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to bootstrap the database schema on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// HS256 secret for decoding storefront session tokens. When absent,
    /// every request is treated as a guest.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Prefix of human-facing order numbers
    #[serde(default = "default_order_number_prefix")]
    pub order_number_prefix: String,

    /// Display currency stored on orders
    #[serde(default = "default_order_currency")]
    pub currency: String,

    /// Surcharge applied by the storefront for cash-on-delivery orders
    #[serde(default = "default_cod_fee")]
    pub cod_fee: Decimal,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[validate]
    pub courier: CourierConfig,

    #[validate]
    pub payment: PaymentConfig,

    #[validate]
    pub email: EmailConfig,
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_order_number_prefix() -> String {
    "ORD".to_string()
}
fn default_order_currency() -> String {
    "RON".to_string()
}
fn default_cod_fee() -> Decimal {
    Decimal::new(10, 0)
}
fn default_country_id() -> i64 {
    642
}
fn default_service_id() -> i64 {
    2505
}
fn default_pickup_cutoff_hour() -> u32 {
    15
}
fn default_payment_base_url() -> String {
    "https://api.stripe.com".to_string()
}
fn default_currency_code() -> String {
    "ron".to_string()
}
fn default_email_base_url() -> String {
    "https://api.resend.com".to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}

/// Loads configuration: `config/default.toml`, then the environment-specific
/// file, then `APP__*` environment variables (highest precedence).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;

    app_config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    Ok(app_config)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            jwt_secret: None,
            order_number_prefix: default_order_number_prefix(),
            currency: default_order_currency(),
            cod_fee: default_cod_fee(),
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            courier: CourierConfig {
                base_url: "https://courier.example".into(),
                username: "user".into(),
                password: "pass".into(),
                country_id: default_country_id(),
                service_id: default_service_id(),
                pickup_cutoff_hour: default_pickup_cutoff_hour(),
            },
            payment: PaymentConfig {
                base_url: default_payment_base_url(),
                secret_key: "sk_test_123".into(),
                currency: default_currency_code(),
            },
            email: EmailConfig {
                base_url: default_email_base_url(),
                api_key: "re_test_123".into(),
                from_address: "shop@example.com".into(),
                owner_email: "owner@example.com".into(),
            },
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn empty_courier_credentials_fail_validation() {
        let mut cfg = base_config();
        cfg.courier.username.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_owner_email_fails_validation() {
        let mut cfg = base_config();
        cfg.email.owner_email = "not-an-email".into();
        assert!(cfg.validate().is_err());
    }
}
