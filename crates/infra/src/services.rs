//! Service wiring: one store + one bus → every inventory service.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use larder_core::IngredientId;
use larder_events::EventBus;
use larder_inventory::{MovementContext, MovementType};

use crate::alerts::AlertEmitter;
use crate::availability::{AvailabilityCascade, SweepReport};
use crate::catalog::IngredientCatalog;
use crate::consumption::ConsumptionEngine;
use crate::error::ServiceError;
use crate::ledger::{LedgerSettings, MovementOutcome, StockLedger};
use crate::notify::{NotificationEnvelope, Notifier};
use crate::recipes::RecipeRegistry;
use crate::store::{IngredientStore, RecipeStore};

/// Outcome of one periodic sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub availability: SweepReport,
    pub low_stock_alerts: usize,
}

/// Every inventory service over one shared store and bus.
///
/// Admin stock movements should go through [`Larder::record_movement`], which runs
/// the availability cascade after the commit.
#[derive(Debug)]
pub struct Larder<S, B> {
    /// Raw ledger access for history, reconciliation and point-in-time audit.
    /// Its `apply_movement` does not touch menu availability; callers that use it
    /// directly leave the flags to the next sweep.
    pub ledger: StockLedger<S, B>,
    pub catalog: IngredientCatalog<S, B>,
    pub recipes: RecipeRegistry<S, B>,
    pub consumption: ConsumptionEngine<S, B>,
    pub availability: AvailabilityCascade<S, B>,
    pub alerts: AlertEmitter<B>,
    store: Arc<S>,
}

impl<S, B: Clone> Clone for Larder<S, B> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            catalog: self.catalog.clone(),
            recipes: self.recipes.clone(),
            consumption: self.consumption.clone(),
            availability: self.availability.clone(),
            alerts: self.alerts.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S, B> Larder<S, B>
where
    S: IngredientStore + RecipeStore,
    B: EventBus<NotificationEnvelope> + Clone,
{
    pub fn new(store: Arc<S>, bus: B, settings: LedgerSettings) -> Self {
        let notifier = Notifier::new(bus);
        let alerts = AlertEmitter::new(notifier.clone());
        let ledger = StockLedger::new(Arc::clone(&store), alerts.clone(), settings);
        let availability = AvailabilityCascade::new(Arc::clone(&store), notifier.clone());
        let catalog =
            IngredientCatalog::new(Arc::clone(&store), ledger.clone(), notifier, settings);
        let recipes = RecipeRegistry::new(Arc::clone(&store), availability.clone());
        let consumption =
            ConsumptionEngine::new(Arc::clone(&store), ledger.clone(), availability.clone());

        Self {
            ledger,
            catalog,
            recipes,
            consumption,
            availability,
            alerts,
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Admin stock movement (delivery, count correction, waste) followed by an
    /// availability recompute of the menu items using the ingredient.
    pub fn record_movement(
        &self,
        ingredient_id: IngredientId,
        delta: Decimal,
        movement_type: MovementType,
        context: MovementContext,
    ) -> Result<MovementOutcome, ServiceError> {
        let outcome = self
            .ledger
            .apply_movement(ingredient_id, delta, movement_type, context)?;
        if let Err(err) = self.availability.recompute_for_ingredients(&[ingredient_id]) {
            warn!(%ingredient_id, error = %err, "availability cascade after movement failed");
        }
        Ok(outcome)
    }

    /// Periodic backstop: recompute every menu item and re-emit low-stock alerts.
    pub fn sweep(&self) -> Result<SweepSummary, ServiceError> {
        let availability = self.availability.recompute_all()?;
        let ingredients = self.store.list_ingredients()?;
        let low_stock_alerts = self.alerts.sweep(&ingredients, Utc::now());
        info!(
            menu_items = availability.checked,
            flipped = availability.changed,
            low_stock_alerts,
            "sweep finished"
        );
        Ok(SweepSummary {
            availability,
            low_stock_alerts,
        })
    }
}

#[cfg(test)]
mod tests {
    use larder_menu::RecipeLine;

    use super::*;
    use crate::notify::InventoryNotification;
    use crate::testing::{actor, d, harness, new_ingredient};

    #[test]
    fn delivery_restores_availability_of_dependent_items() {
        let h = harness();
        let cheese = h
            .larder
            .catalog
            .create_ingredient(new_ingredient("Cheese", "kg", "0", "0"), actor())
            .unwrap();
        let pizza = h.larder.recipes.register_menu_item("Pizza").unwrap();
        h.larder
            .recipes
            .replace_recipe(pizza.id, &[RecipeLine::new(cheese.id_typed(), d("0.1"))])
            .unwrap();
        assert!(!h.larder.recipes.menu_item(pizza.id).unwrap().is_available);

        h.larder
            .record_movement(
                cheese.id_typed(),
                d("2"),
                MovementType::Purchase,
                MovementContext::by(actor()).with_unit_price(d("900")),
            )
            .unwrap();

        assert!(h.larder.recipes.menu_item(pizza.id).unwrap().is_available);
    }

    #[test]
    fn raw_ledger_movement_leaves_availability_to_the_sweep() {
        let h = harness();
        let cheese = h
            .larder
            .catalog
            .create_ingredient(new_ingredient("Cheese", "kg", "0", "0"), actor())
            .unwrap();
        let pizza = h.larder.recipes.register_menu_item("Pizza").unwrap();
        h.larder
            .recipes
            .replace_recipe(pizza.id, &[RecipeLine::new(cheese.id_typed(), d("0.1"))])
            .unwrap();

        h.larder
            .ledger
            .apply_movement(cheese.id_typed(), d("2"), MovementType::Purchase, MovementContext::by(actor()))
            .unwrap();
        assert!(!h.larder.recipes.menu_item(pizza.id).unwrap().is_available);

        let summary = h.larder.sweep().unwrap();
        assert_eq!(summary.availability.changed, 1);
        assert!(h.larder.recipes.menu_item(pizza.id).unwrap().is_available);
    }

    #[test]
    fn sweep_re_emits_low_stock_for_active_ingredients() {
        let h = harness();
        h.larder
            .catalog
            .create_ingredient(new_ingredient("Flour", "kg", "1", "5"), actor())
            .unwrap();
        h.larder
            .catalog
            .create_ingredient(new_ingredient("Salt", "kg", "9", "1"), actor())
            .unwrap();
        let subscription = h.bus.subscribe();

        let summary = h.larder.sweep().unwrap();

        assert_eq!(summary.low_stock_alerts, 1);
        let received = subscription.drain();
        assert_eq!(received.len(), 1);
        assert!(matches!(
            received[0].payload(),
            InventoryNotification::LowStock(alert) if alert.name == "Flour"
        ));
    }
}
