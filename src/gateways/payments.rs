use crate::config::PaymentConfig;
use crate::errors::ServiceError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// A created payment intent; the client secret goes back to the browser to
/// complete card collection.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

/// Order metadata attached to every intent, so charges can be traced back
/// from the processor dashboard.
#[derive(Debug, Clone)]
pub struct PaymentIntentMetadata {
    pub order_id: Uuid,
    pub order_number: String,
    pub email: String,
}

/// Intent state as reported by the processor.
#[derive(Debug, Clone)]
pub struct PaymentIntentState {
    pub id: String,
    pub status: String,
}

impl PaymentIntentState {
    /// The processor has captured the funds.
    pub fn is_succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

/// Thin wrapper over the payment processor's payment-intent endpoint.
#[derive(Clone)]
pub struct PaymentGateway {
    http: reqwest::Client,
    cfg: PaymentConfig,
}

impl PaymentGateway {
    pub fn new(cfg: PaymentConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("payment http client"),
            cfg,
        }
    }

    /// Creates a payment intent for `amount` (major units, converted to
    /// minor units by rounding) and returns its id and client secret.
    #[instrument(skip(self, metadata), fields(order_id = %metadata.order_id))]
    pub async fn create_payment_intent(
        &self,
        amount: Decimal,
        metadata: &PaymentIntentMetadata,
    ) -> Result<PaymentIntent, ServiceError> {
        let minor_units = to_minor_units(amount)?;

        let params = [
            ("amount", minor_units.to_string()),
            ("currency", self.cfg.currency.clone()),
            ("metadata[order_id]", metadata.order_id.to_string()),
            ("metadata[order_number]", metadata.order_number.clone()),
            ("metadata[email]", metadata.email.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.cfg.base_url))
            .basic_auth(&self.cfg.secret_key, None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentError(format!("intent request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: PaymentErrorResponse = response.json().await.unwrap_or_default();
            let detail = body
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(ServiceError::PaymentError(detail));
        }

        let intent: PaymentIntentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentError(format!("invalid intent body: {}", e)))?;

        Ok(PaymentIntent {
            id: intent.id,
            client_secret: intent.client_secret,
        })
    }

    /// Fetches an intent's current state from the processor. Settlement
    /// decisions are made on this, never on what the caller claims.
    #[instrument(skip(self))]
    pub async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<PaymentIntentState, ServiceError> {
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/{}", self.cfg.base_url, intent_id))
            .basic_auth(&self.cfg.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentError(format!("intent lookup failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: PaymentErrorResponse = response.json().await.unwrap_or_default();
            let detail = body
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(ServiceError::PaymentError(detail));
        }

        let state: PaymentIntentStateResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentError(format!("invalid intent body: {}", e)))?;

        Ok(PaymentIntentState {
            id: state.id,
            status: state.status,
        })
    }
}

/// Converts a major-unit amount to minor currency units, rounding to the
/// nearest unit. Rejects negative amounts and amounts too large for i64.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount.is_sign_negative() {
        return Err(ServiceError::PaymentError(format!(
            "amount must be non-negative, got {}",
            amount
        )));
    }

    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| {
            ServiceError::PaymentError(format!("amount {} out of range for minor units", amount))
        })
}

#[derive(Deserialize)]
struct PaymentIntentResponse {
    id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct PaymentIntentStateResponse {
    id: String,
    status: String,
}

#[derive(Deserialize, Default)]
struct PaymentErrorResponse {
    error: Option<PaymentErrorDetail>,
}

#[derive(Deserialize)]
struct PaymentErrorDetail {
    message: String,
}
