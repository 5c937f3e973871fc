//! Storefront Core
//!
//! Checkout, order, and inventory commitment engine: converts a customer's
//! cart into a durable order, reconciles asynchronous payment outcomes, and
//! compensates cancellations, all under one-transaction-per-operation
//! atomicity and guarded stock updates.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod services;

use crate::{
    config::AppConfig,
    events::EventSender,
    services::{
        cancellation::CancellationService, carts::CartService, checkout::CheckoutService,
        notifications::NotificationDispatcher, payments::PaymentService,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Bundles the core services over one database handle.
#[derive(Clone)]
pub struct CoreServices {
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub payments: PaymentService,
    pub cancellation: CancellationService,
}

impl CoreServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            carts: CartService::new(db.clone(), event_sender.clone()),
            checkout: CheckoutService::new(
                db.clone(),
                event_sender.clone(),
                dispatcher.clone(),
                config,
            ),
            payments: PaymentService::new(db.clone(), event_sender.clone(), dispatcher.clone()),
            cancellation: CancellationService::new(db, event_sender, dispatcher),
        }
    }
}
