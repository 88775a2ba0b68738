//! Outbound integrations: courier API, payment processor, email provider.

pub mod courier;
pub mod mailer;
pub mod payments;

pub use courier::{CourierClient, CourierShipment};
pub use mailer::MailerClient;
pub use payments::{PaymentGateway, PaymentIntent, PaymentIntentState};
