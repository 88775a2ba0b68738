use crate::config::CourierConfig;
use crate::errors::ServiceError;
use base64::Engine;
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, Timelike, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, warn};

/// Nominal weight per parcel, in kilograms. The storefront ships clothing;
/// the courier only needs a declared unit weight.
const PARCEL_WEIGHT_KG: f64 = 1.0;
const PACKAGE_TYPE: &str = "BOX";
const PARCEL_CONTENTS: &str = "Imbracaminte";

/// What the workflow needs back from a successful shipment call.
#[derive(Debug, Clone)]
pub struct CourierShipment {
    pub shipment_id: String,
    pub parcel_ids: Vec<String>,
    /// Tracking number: first parcel id, falling back to the shipment id.
    pub awb_number: String,
}

/// Everything the courier needs to pick up one order.
#[derive(Debug, Clone)]
pub struct ShipmentOrder {
    pub recipient_name: String,
    pub phone: String,
    pub street: String,
    pub city: String,
    pub order_number: String,
    pub total: Decimal,
    pub cash_on_delivery: bool,
    pub parcel_count: u32,
}

/// Client for the courier REST API: site lookup, shipment creation, label
/// printing.
#[derive(Clone)]
pub struct CourierClient {
    http: reqwest::Client,
    cfg: CourierConfig,
}

impl CourierClient {
    pub fn new(cfg: CourierConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("courier http client"),
            cfg,
        }
    }

    /// Resolves a free-text city name to the courier's internal site id.
    /// Diacritics are stripped first; beyond that there is no fuzzy matching
    /// and no caching. Returns `None` when the courier knows no such city.
    #[instrument(skip(self))]
    pub async fn resolve_site(&self, city: &str) -> Result<Option<i64>, ServiceError> {
        let body = SiteLookupRequest {
            user_name: &self.cfg.username,
            password: &self.cfg.password,
            country_id: self.cfg.country_id,
            name: strip_diacritics(city),
        };

        let response = self
            .http
            .post(format!("{}/location/site", self.cfg.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::CourierError(format!("site lookup failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::CourierError(format!(
                "site lookup returned HTTP {}",
                response.status()
            )));
        }

        let parsed: SiteLookupResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::CourierError(format!("invalid site lookup body: {}", e)))?;

        if let Some(err) = parsed.error {
            return Err(ServiceError::CourierError(err.message));
        }

        Ok(parsed
            .sites
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|site| site.id))
    }

    /// Creates a shipment and returns its courier identifiers. Fails fast
    /// with a descriptive error when the destination city cannot be resolved
    /// or when the courier response carries an error object.
    #[instrument(skip(self, order), fields(order_number = %order.order_number, city = %order.city))]
    pub async fn create_shipment(
        &self,
        order: &ShipmentOrder,
    ) -> Result<CourierShipment, ServiceError> {
        let site_id = self.resolve_site(&order.city).await?.ok_or_else(|| {
            ServiceError::CourierError(format!(
                "no courier site matches city '{}'",
                order.city
            ))
        })?;

        let pickup_date = next_pickup_date(Local::now().naive_local(), self.cfg.pickup_cutoff_hour);
        let parcel_count = order.parcel_count.max(1);

        let body = ShipmentRequest {
            user_name: &self.cfg.username,
            password: &self.cfg.password,
            service: ServiceBlock {
                service_id: self.cfg.service_id,
                pickup_date: pickup_date.format("%Y-%m-%d").to_string(),
                auto_adjust_pickup_date: false,
            },
            recipient: RecipientBlock {
                client_name: &order.recipient_name,
                private_person: true,
                phone1: PhoneBlock {
                    number: &order.phone,
                },
                address: AddressBlock {
                    country_id: self.cfg.country_id,
                    site_id,
                    address_note: &order.street,
                },
            },
            content: ContentBlock {
                parcels_count: parcel_count,
                total_weight: PARCEL_WEIGHT_KG * parcel_count as f64,
                contents: PARCEL_CONTENTS,
                package: PACKAGE_TYPE,
                parcels: (0..parcel_count)
                    .map(|_| ParcelBlock {
                        weight: PARCEL_WEIGHT_KG,
                    })
                    .collect(),
            },
            payment: PaymentBlock {
                courier_service_payer: "SENDER",
            },
            ref1: &order.order_number,
            cash_on_delivery: order.cash_on_delivery.then(|| CashOnDeliveryBlock {
                amount: order.total.to_f64().unwrap_or_default(),
                processing_type: "CASH",
            }),
        };

        let response = self
            .http
            .post(format!("{}/shipment", self.cfg.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::CourierError(format!("shipment request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::CourierError(format!(
                "shipment request returned HTTP {}",
                response.status()
            )));
        }

        let parsed: ShipmentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::CourierError(format!("invalid shipment body: {}", e)))?;

        extract_shipment(parsed)
    }

    /// Fetches a printable label (PDF, returned base64-encoded) for the given
    /// parcels. Out of the critical path; any failure yields `None`.
    #[instrument(skip(self))]
    pub async fn fetch_label(&self, parcel_ids: &[String]) -> Option<String> {
        let body = LabelRequest {
            user_name: &self.cfg.username,
            password: &self.cfg.password,
            paper_size: "A6",
            parcels: parcel_ids
                .iter()
                .map(|id| LabelParcelRef {
                    parcel: LabelParcelId { id },
                })
                .collect(),
        };

        let response = self
            .http
            .post(format!("{}/print", self.cfg.base_url))
            .json(&body)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "label request rejected");
            return None;
        }

        let bytes = response.bytes().await.ok()?;
        Some(base64::engine::general_purpose::STANDARD.encode(bytes))
    }
}

/// Pulls shipment id, parcel ids and the AWB number out of a courier
/// response, surfacing courier-side errors.
fn extract_shipment(response: ShipmentResponse) -> Result<CourierShipment, ServiceError> {
    if let Some(err) = response.error {
        return Err(ServiceError::CourierError(err.message));
    }

    let shipment_id = response
        .id
        .ok_or_else(|| ServiceError::CourierError("courier response lacks a shipment id".into()))?;

    let parcel_ids: Vec<String> = response
        .parcels
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.id)
        .collect();

    let awb_number = parcel_ids
        .first()
        .cloned()
        .unwrap_or_else(|| shipment_id.clone());

    Ok(CourierShipment {
        shipment_id,
        parcel_ids,
        awb_number,
    })
}

/// Replaces Romanian diacritics with their base letters; the courier's site
/// lookup only matches plain ASCII names.
pub fn strip_diacritics(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'ă' | 'â' => 'a',
            'î' => 'i',
            'ș' | 'ş' => 's',
            'ț' | 'ţ' => 't',
            'Ă' | 'Â' => 'A',
            'Î' => 'I',
            'Ș' | 'Ş' => 'S',
            'Ț' | 'Ţ' => 'T',
            other => other,
        })
        .collect()
}

/// Next courier pickup date: today before the cutoff hour, otherwise
/// tomorrow; a date landing on Saturday moves two days and Sunday one day,
/// so pickup always falls Monday through Friday.
pub fn next_pickup_date(now: NaiveDateTime, cutoff_hour: u32) -> NaiveDate {
    let mut date = if now.hour() < cutoff_hour {
        now.date()
    } else {
        now.date() + ChronoDuration::days(1)
    };

    match date.weekday() {
        Weekday::Sat => date += ChronoDuration::days(2),
        Weekday::Sun => date += ChronoDuration::days(1),
        _ => {}
    }

    date
}

// Wire types

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SiteLookupRequest<'a> {
    user_name: &'a str,
    password: &'a str,
    country_id: i64,
    name: String,
}

#[derive(Deserialize)]
struct SiteLookupResponse {
    sites: Option<Vec<Site>>,
    error: Option<CourierErrorBody>,
}

#[derive(Deserialize)]
struct Site {
    id: i64,
}

#[derive(Deserialize)]
struct CourierErrorBody {
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShipmentRequest<'a> {
    user_name: &'a str,
    password: &'a str,
    service: ServiceBlock,
    recipient: RecipientBlock<'a>,
    content: ContentBlock,
    payment: PaymentBlock,
    ref1: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cash_on_delivery: Option<CashOnDeliveryBlock>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceBlock {
    service_id: i64,
    pickup_date: String,
    auto_adjust_pickup_date: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecipientBlock<'a> {
    client_name: &'a str,
    private_person: bool,
    phone1: PhoneBlock<'a>,
    address: AddressBlock<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PhoneBlock<'a> {
    number: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddressBlock<'a> {
    country_id: i64,
    site_id: i64,
    address_note: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentBlock {
    parcels_count: u32,
    total_weight: f64,
    contents: &'static str,
    package: &'static str,
    parcels: Vec<ParcelBlock>,
}

#[derive(Serialize)]
struct ParcelBlock {
    weight: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentBlock {
    courier_service_payer: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CashOnDeliveryBlock {
    amount: f64,
    processing_type: &'static str,
}

#[derive(Deserialize)]
struct ShipmentResponse {
    id: Option<String>,
    parcels: Option<Vec<ParcelRef>>,
    error: Option<CourierErrorBody>,
}

#[derive(Deserialize)]
struct ParcelRef {
    id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelRequest<'a> {
    user_name: &'a str,
    password: &'a str,
    paper_size: &'static str,
    parcels: Vec<LabelParcelRef<'a>>,
}

#[derive(Serialize)]
struct LabelParcelRef<'a> {
    parcel: LabelParcelId<'a>,
}

#[derive(Serialize)]
struct LabelParcelId<'a> {
    id: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(date: (i32, u32, u32), hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn strip_diacritics_handles_romanian_city_names() {
        assert_eq!(strip_diacritics("București"), "Bucuresti");
        assert_eq!(strip_diacritics("Iași"), "Iasi");
        assert_eq!(strip_diacritics("Târgu Mureș"), "Targu Mures");
        assert_eq!(strip_diacritics("Constanța"), "Constanta");
        assert_eq!(strip_diacritics("Brasov"), "Brasov");
    }

    #[test]
    fn pickup_before_cutoff_is_same_day() {
        // Wednesday 2025-06-11, 10:00
        let date = next_pickup_date(at((2025, 6, 11), 10), 15);
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 11).unwrap());
    }

    #[test]
    fn pickup_after_cutoff_rolls_to_next_day() {
        // Wednesday 16:00 -> Thursday
        let date = next_pickup_date(at((2025, 6, 11), 16), 15);
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 12).unwrap());
    }

    #[test]
    fn saturday_pickup_moves_to_monday() {
        // Friday 18:00 -> Saturday -> Monday
        let date = next_pickup_date(at((2025, 6, 13), 18), 15);
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 16).unwrap());
        assert_eq!(date.weekday(), Weekday::Mon);
    }

    #[test]
    fn sunday_pickup_moves_to_monday() {
        // Sunday 09:00 -> Monday
        let date = next_pickup_date(at((2025, 6, 15), 9), 15);
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 16).unwrap());
    }

    #[test]
    fn awb_number_prefers_first_parcel_id() {
        let response = ShipmentResponse {
            id: Some("5001".into()),
            parcels: Some(vec![
                ParcelRef { id: "80400001".into() },
                ParcelRef { id: "80400002".into() },
            ]),
            error: None,
        };

        let shipment = extract_shipment(response).unwrap();
        assert_eq!(shipment.awb_number, "80400001");
        assert_eq!(shipment.shipment_id, "5001");
        assert_eq!(shipment.parcel_ids.len(), 2);
    }

    #[test]
    fn awb_number_falls_back_to_shipment_id() {
        let response = ShipmentResponse {
            id: Some("5002".into()),
            parcels: None,
            error: None,
        };

        let shipment = extract_shipment(response).unwrap();
        assert_eq!(shipment.awb_number, "5002");
        assert!(shipment.parcel_ids.is_empty());
    }

    #[test]
    fn courier_error_object_is_surfaced() {
        let response = ShipmentResponse {
            id: Some("5003".into()),
            parcels: None,
            error: Some(CourierErrorBody {
                message: "invalid pickup date".into(),
            }),
        };

        let err = extract_shipment(response).unwrap_err();
        assert!(err.to_string().contains("invalid pickup date"));
    }

    #[test]
    fn missing_shipment_id_is_an_error() {
        let response = ShipmentResponse {
            id: None,
            parcels: None,
            error: None,
        };

        assert!(extract_shipment(response).is_err());
    }
}
