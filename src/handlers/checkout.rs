use crate::{
    auth::MaybeUser,
    errors::ApiError,
    handlers::common::{created_response, validate_input},
    services::checkout::{CheckoutRequest, PlacedOrder},
    AppState,
};
use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(place_order))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutResponse {
    order_id: Uuid,
    order_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    awb_number: Option<String>,
}

impl From<PlacedOrder> for CheckoutResponse {
    fn from(placed: PlacedOrder) -> Self {
        Self {
            order_id: placed.order_id,
            order_number: placed.order_number,
            client_secret: placed.client_secret,
            awb_number: placed.awb_number,
        }
    }
}

/// POST /api/v1/checkout
///
/// Places an order for the authenticated user or, absent a session token,
/// as a guest.
#[instrument(skip(state, request), fields(user_id = ?user.id()))]
async fn place_order(
    State(state): State<Arc<AppState>>,
    user: MaybeUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&request)?;
    let placed = state
        .services
        .checkout
        .place_order(user.id(), request)
        .await?;
    Ok(created_response(CheckoutResponse::from(placed)))
}
