pub mod checkout;
pub mod notifications;
pub mod orders;
pub mod shipping;
