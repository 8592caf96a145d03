//! Infrastructure layer: stores, ledger, services, workers, config.
//!
//! Everything here is synchronous. Services share one store (`Arc<S>`) and one
//! notification bus, and are assembled by [`Larder`].

pub mod alerts;
pub mod availability;
pub mod catalog;
pub mod config;
pub mod consumption;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod recipes;
pub mod services;
pub mod store;
pub mod workers;

#[cfg(test)]
mod testing;

mod integration_tests;

pub use config::{ConfigError, LarderConfig};
pub use error::ServiceError;
pub use ledger::{LedgerSettings, MovementOutcome, MovementRequest, ReconciliationReport};
pub use notify::{InventoryNotification, NotificationEnvelope};
pub use services::{Larder, SweepSummary};
