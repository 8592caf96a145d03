//! Shared fixtures for unit and integration tests.

use std::sync::Arc;

use rust_decimal::Decimal;

use larder_core::UserId;
use larder_events::InMemoryEventBus;
use larder_inventory::NewIngredient;

use crate::ledger::LedgerSettings;
use crate::notify::NotificationEnvelope;
use crate::services::Larder;
use crate::store::InMemoryInventoryStore;

pub(crate) type TestBus = Arc<InMemoryEventBus<NotificationEnvelope>>;

pub(crate) struct Harness {
    pub larder: Larder<InMemoryInventoryStore, TestBus>,
    pub store: Arc<InMemoryInventoryStore>,
    pub bus: TestBus,
}

pub(crate) fn harness() -> Harness {
    let store = Arc::new(InMemoryInventoryStore::new());
    let bus: TestBus = Arc::new(InMemoryEventBus::new());
    let larder = Larder::new(store.clone(), bus.clone(), LedgerSettings::default());
    Harness { larder, store, bus }
}

pub(crate) fn d(value: &str) -> Decimal {
    value.parse().unwrap()
}

pub(crate) fn actor() -> UserId {
    UserId::new()
}

pub(crate) fn new_ingredient(name: &str, unit: &str, opening: &str, min: &str) -> NewIngredient {
    NewIngredient {
        name: name.to_string(),
        unit: unit.to_string(),
        min_stock_level: d(min),
        cost_per_unit: None,
        opening_stock: d(opening),
    }
}
