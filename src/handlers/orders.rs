use crate::{
    auth::MaybeUser,
    errors::ApiError,
    handlers::common::{success_response, PaginationParams},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:order_id", get(get_order))
        .route("/:order_id/confirm-payment", post(confirm_payment))
        .route("/:order_id/label", get(get_label))
}

/// GET /api/v1/orders
///
/// Authenticated users see their own orders; guests get an empty page
/// rather than the whole table.
#[instrument(skip(state), fields(user_id = ?user.id()))]
async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: MaybeUser,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(user_id) = user.id() else {
        return Err(ApiError::BadRequest {
            message: "Listing orders requires a session".to_string(),
            error_code: None,
        });
    };

    let list = state
        .services
        .orders
        .list_orders(params.page(), params.per_page(), Some(user_id))
        .await?;
    Ok(success_response(list))
}

/// GET /api/v1/orders/:order_id
#[instrument(skip(state))]
async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.get_order(order_id).await?;
    Ok(success_response(order))
}

/// POST /api/v1/orders/:order_id/confirm-payment
///
/// Marks a card order as paid. The stored payment intent is re-checked with
/// the processor first; the order settles only when it reports `succeeded`.
#[instrument(skip(state))]
async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.confirm_payment(order_id).await?;
    Ok(success_response(order))
}

#[derive(Debug, Serialize)]
struct LabelResponse {
    order_id: Uuid,
    /// Base64-encoded PDF.
    label: String,
}

/// GET /api/v1/orders/:order_id/label
///
/// Printable parcel label for a shipped order; 404 until the courier has
/// accepted the shipment.
#[instrument(skip(state))]
async fn get_label(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    match state.services.shipping.shipment_label(order_id).await? {
        Some(label) => Ok(Json(LabelResponse { order_id, label })),
        None => Err(ApiError::NotFound(format!(
            "No shipping label available for order {}",
            order_id
        ))),
    }
}
