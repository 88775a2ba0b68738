use anyhow::Context;
use axum::{routing::get, Router};
use std::sync::Arc;
use storefront_api::{
    config, db,
    events::{self, outbox, EventContext, EventSender},
    handlers::{self, AppServices},
    AppState,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    info!(environment = %cfg.environment, "starting storefront API");

    let db = Arc::new(
        db::establish_connection_from_app_config(&cfg)
            .await
            .context("failed to connect to the database")?,
    );

    if cfg.auto_migrate {
        db::run_migrations(&db)
            .await
            .context("failed to run migrations")?;
        info!("database schema is up to date");
    }

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let event_sender = Arc::new(EventSender::new(tx));

    let config = Arc::new(cfg);
    let services = AppServices::new(db.clone(), event_sender.clone(), &config);

    let event_ctx = EventContext {
        db: db.clone(),
        orders: services.orders.clone(),
        shipping: services.shipping.clone(),
        notifications: services.notifications.clone(),
    };
    tokio::spawn(events::process_events(rx, event_ctx));
    outbox::start_worker(db.clone(), (*event_sender).clone());

    let state = Arc::new(AppState {
        config: config.clone(),
        services,
    });

    let cors = build_cors(config.cors_allowed_origins.as_deref());

    let app = Router::new()
        .route("/", get(|| async { "Storefront Order API" }))
        .route("/health", get(health_check))
        .nest("/api/v1", handlers::api_v1_routes())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down cleanly");
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

fn build_cors(allowed_origins: Option<&str>) -> CorsLayer {
    match allowed_origins {
        Some(origins) => {
            let parsed: Vec<axum::http::HeaderValue> = origins
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any)
        }
        None => {
            warn!("no CORS origins configured; allowing any origin");
            CorsLayer::permissive()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
