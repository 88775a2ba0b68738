#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

//! Storefront order API: checkout, courier shipments, card payment intents
//! and transactional order emails for a small e-commerce shop.

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateways;
pub mod handlers;
pub mod services;

use crate::config::AppConfig;
use crate::handlers::AppServices;
use std::sync::Arc;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: AppServices,
}
