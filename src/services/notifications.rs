use crate::{db::DbPool, errors::ServiceError, events::outbox, gateways::mailer::MailerClient};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// One rendered line of an order email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEmailItem {
    pub name: String,
    pub size: Option<String>,
    pub color: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// Everything the two order emails need, assembled by the order service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEmailData {
    pub order_id: Uuid,
    pub order_number: String,
    /// Unknown for authenticated customers whose contact lives with the
    /// hosted auth provider; in that case only the owner email goes out.
    pub customer_email: Option<String>,
    pub recipient_name: String,
    pub phone: String,
    pub street: String,
    pub city: String,
    pub county: Option<String>,
    pub postal_code: String,
    pub items: Vec<OrderEmailItem>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub delivery_method_label: String,
    pub payment_method_label: String,
    pub awb_number: Option<String>,
    pub notes: Option<String>,
}

/// Renders and dispatches the owner and customer order emails. Fire and
/// forget relative to the order lifecycle: failures are logged and queued
/// for replay, never surfaced to the checkout caller.
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DbPool>,
    mailer: Arc<MailerClient>,
}

impl NotificationService {
    pub fn new(db: Arc<DbPool>, mailer: Arc<MailerClient>) -> Self {
        Self { db, mailer }
    }

    /// Sends both emails concurrently; an error from either send surfaces.
    #[instrument(skip(self, data), fields(order_number = %data.order_number))]
    pub async fn send_order_emails(&self, data: &OrderEmailData) -> Result<(), ServiceError> {
        let owner_subject = format!("Comanda noua {}", data.order_number);
        let owner_html = render_owner_email(data);

        let owner_fut = self
            .mailer
            .send(self.mailer.owner_email(), &owner_subject, &owner_html);

        match &data.customer_email {
            Some(customer_email) => {
                let customer_subject = format!("Confirmarea comenzii {}", data.order_number);
                let customer_html = render_customer_email(data);
                let customer_fut = self
                    .mailer
                    .send(customer_email, &customer_subject, &customer_html);

                let (owner_result, customer_result) = tokio::join!(owner_fut, customer_fut);
                owner_result?;
                customer_result?;
            }
            None => {
                warn!("no customer email on order; sending owner notification only");
                owner_fut.await?;
            }
        }

        info!("order emails dispatched");
        Ok(())
    }

    /// Best-effort dispatch used by the event loop: a failure is recorded in
    /// the outbox so the worker can replay it.
    pub async fn dispatch_order_emails(&self, data: &OrderEmailData) {
        if let Err(e) = self.send_order_emails(data).await {
            warn!(order_id = %data.order_id, error = %e, "order emails failed; queuing for replay");
            let payload = json!({ "order_id": data.order_id, "order_number": data.order_number });
            if let Err(oe) = outbox::enqueue(
                &*self.db,
                "order",
                data.order_id,
                outbox::EVENT_ORDER_EMAILS,
                &payload,
            )
            .await
            {
                error!(order_id = %data.order_id, error = %oe, "failed to enqueue email replay");
            }
        }
    }
}

fn items_table(data: &OrderEmailData) -> String {
    let mut rows = String::new();
    for item in &data.items {
        let mut variant = String::new();
        if let Some(size) = &item.size {
            let _ = write!(variant, " / {}", size);
        }
        if let Some(color) = &item.color {
            let _ = write!(variant, " / {}", color);
        }
        let _ = write!(
            rows,
            "<tr><td>{}{}</td><td>{}</td><td>{} {}</td><td>{} {}</td></tr>",
            item.name, variant, item.quantity, item.unit_price, data.currency, item.subtotal,
            data.currency
        );
    }
    format!(
        "<table><thead><tr><th>Produs</th><th>Cantitate</th><th>Pret</th><th>Subtotal</th></tr></thead><tbody>{}</tbody></table>",
        rows
    )
}

fn totals_block(data: &OrderEmailData) -> String {
    format!(
        "<p>Subtotal: {subtotal} {cur}<br/>Livrare: {shipping} {cur}<br/><strong>Total: {total} {cur}</strong></p>",
        subtotal = data.subtotal,
        shipping = data.shipping_cost,
        total = data.total,
        cur = data.currency,
    )
}

fn address_block(data: &OrderEmailData) -> String {
    let county = data.county.as_deref().unwrap_or("-");
    format!(
        "<p>{}<br/>{}<br/>{}, {} {}<br/>Tel: {}</p>",
        data.recipient_name, data.street, data.city, county, data.postal_code, data.phone
    )
}

/// Owner-facing operational summary.
pub fn render_owner_email(data: &OrderEmailData) -> String {
    let awb = data.awb_number.as_deref().unwrap_or("neexpediat");
    let notes = data.notes.as_deref().unwrap_or("-");
    format!(
        "<html><body>\
        <h1>Comanda noua {number}</h1>\
        {address}\
        {items}\
        {totals}\
        <p>Livrare: {delivery}<br/>Plata: {payment}<br/>AWB: {awb}<br/>Observatii: {notes}</p>\
        </body></html>",
        number = data.order_number,
        address = address_block(data),
        items = items_table(data),
        totals = totals_block(data),
        delivery = data.delivery_method_label,
        payment = data.payment_method_label,
        awb = awb,
        notes = notes,
    )
}

/// Customer-facing order confirmation.
pub fn render_customer_email(data: &OrderEmailData) -> String {
    let tracking = match &data.awb_number {
        Some(awb) => format!("<p>Numarul de urmarire al coletului: <strong>{}</strong></p>", awb),
        None => String::new(),
    };
    format!(
        "<html><body>\
        <h1>Multumim pentru comanda, {name}!</h1>\
        <p>Comanda <strong>{number}</strong> a fost inregistrata.</p>\
        {items}\
        {totals}\
        <p>Livrare: {delivery}<br/>Plata: {payment}</p>\
        {tracking}\
        {address}\
        </body></html>",
        name = data.recipient_name,
        number = data.order_number,
        items = items_table(data),
        totals = totals_block(data),
        delivery = data.delivery_method_label,
        payment = data.payment_method_label,
        tracking = tracking,
        address = address_block(data),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_data() -> OrderEmailData {
        OrderEmailData {
            order_id: Uuid::new_v4(),
            order_number: "ORD-2025-0310".into(),
            customer_email: Some("client@example.com".into()),
            recipient_name: "Maria Ionescu".into(),
            phone: "+40712345678".into(),
            street: "Str. Lunga 12".into(),
            city: "Brasov".into(),
            county: Some("Brasov".into()),
            postal_code: "500035".into(),
            items: vec![OrderEmailItem {
                name: "Rochie midi".into(),
                size: Some("S".into()),
                color: Some("verde".into()),
                quantity: 2,
                unit_price: dec!(140),
                subtotal: dec!(280),
            }],
            subtotal: dec!(280),
            shipping_cost: dec!(20),
            total: dec!(310),
            currency: "RON".into(),
            delivery_method_label: "Curier rapid".into(),
            payment_method_label: "Ramburs la curier".into(),
            awb_number: Some("80412345678".into()),
            notes: None,
        }
    }

    #[test]
    fn owner_email_carries_order_number_totals_and_awb() {
        let html = render_owner_email(&sample_data());
        assert!(html.contains("ORD-2025-0310"));
        assert!(html.contains("310 RON"));
        assert!(html.contains("80412345678"));
        assert!(html.contains("Rochie midi / S / verde"));
    }

    #[test]
    fn customer_email_omits_tracking_when_unshipped() {
        let mut data = sample_data();
        data.awb_number = None;
        let html = render_customer_email(&data);
        assert!(!html.contains("urmarire"));
        assert!(html.contains("Multumim pentru comanda, Maria Ionescu!"));
    }
}
