//! Availability Cascade: keeps each menu item's derived `is_available` flag in step
//! with recipe × current stock.
//!
//! Recompute is idempotent and writes only on a real flip, so it is safe to trigger
//! from every stock change and again from the periodic sweep. It may race with
//! consumption; a stale flag is corrected by the next trigger or sweep.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use larder_core::{IngredientId, MenuItemId};
use larder_events::EventBus;
use larder_inventory::Ingredient;
use larder_menu::{AvailabilityChange, AvailabilityChanged, evaluate_availability};

use crate::error::ServiceError;
use crate::notify::{InventoryNotification, NotificationEnvelope, Notifier};
use crate::store::{IngredientStore, RecipeStore};

/// Outcome of a full availability sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub changed: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct AvailabilityCascade<S, B> {
    store: Arc<S>,
    notifier: Notifier<B>,
}

impl<S, B: Clone> Clone for AvailabilityCascade<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            notifier: self.notifier.clone(),
        }
    }
}

impl<S, B> AvailabilityCascade<S, B>
where
    S: IngredientStore + RecipeStore,
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(store: Arc<S>, notifier: Notifier<B>) -> Self {
        Self { store, notifier }
    }

    /// Recompute one menu item. An empty recipe leaves the flag as it is.
    pub fn recompute_availability(
        &self,
        menu_item_id: MenuItemId,
    ) -> Result<AvailabilityChange, ServiceError> {
        let item = self
            .store
            .load_menu_item(menu_item_id)?
            .ok_or_else(|| ServiceError::not_found("menu item", menu_item_id))?;
        let recipe = self.store.load_recipe(menu_item_id)?;

        let ids: Vec<IngredientId> = recipe.iter().map(|row| row.ingredient_id).collect();
        let stock: HashMap<IngredientId, Ingredient> = self
            .store
            .load_ingredients(&ids)?
            .into_iter()
            .map(|ingredient| (ingredient.id_typed(), ingredient))
            .collect();

        let Some(availability) = evaluate_availability(&recipe, &stock) else {
            return Ok(AvailabilityChange {
                menu_item_id,
                previous_status: item.is_available,
                current_status: item.is_available,
                missing_ingredients: Vec::new(),
            });
        };

        let flipped = availability.is_available != item.is_available
            && self
                .store
                .set_availability(menu_item_id, availability.is_available)?;
        if flipped {
            info!(
                %menu_item_id,
                name = %item.name,
                is_available = availability.is_available,
                missing = availability.missing.len(),
                "menu item availability changed"
            );
            self.notifier
                .publish(InventoryNotification::AvailabilityChanged(AvailabilityChanged {
                    menu_item_id,
                    name: item.name.clone(),
                    is_available: availability.is_available,
                    missing_ingredients: availability.missing.clone(),
                    occurred_at: Utc::now(),
                }));
        }

        Ok(AvailabilityChange {
            menu_item_id,
            previous_status: item.is_available,
            current_status: availability.is_available,
            missing_ingredients: availability.missing,
        })
    }

    /// Recompute every menu item whose recipe uses any of `ingredients`.
    ///
    /// A failure on one item is logged and the rest still run.
    pub fn recompute_for_ingredients(
        &self,
        ingredients: &[IngredientId],
    ) -> Result<Vec<AvailabilityChange>, ServiceError> {
        let affected = self.store.menu_items_using(ingredients)?;
        let mut changes = Vec::with_capacity(affected.len());
        for menu_item_id in affected {
            match self.recompute_availability(menu_item_id) {
                Ok(change) => changes.push(change),
                Err(err) => warn!(%menu_item_id, error = %err, "availability recompute failed"),
            }
        }
        Ok(changes)
    }

    /// Sweep every menu item (startup and periodic backstop).
    pub fn recompute_all(&self) -> Result<SweepReport, ServiceError> {
        let items = self.store.list_menu_items()?;
        let mut report = SweepReport::default();
        for item in items {
            report.checked += 1;
            match self.recompute_availability(item.id) {
                Ok(change) if change.changed() => report.changed += 1,
                Ok(_) => {}
                Err(err) => {
                    report.failed += 1;
                    warn!(menu_item_id = %item.id, error = %err, "availability sweep item failed");
                }
            }
        }
        info!(
            checked = report.checked,
            changed = report.changed,
            failed = report.failed,
            "availability sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use larder_inventory::MovementType;
    use larder_menu::RecipeLine;

    use super::*;
    use crate::testing::{actor, d, harness, new_ingredient};

    #[test]
    fn empty_recipe_leaves_flag_untouched() {
        let h = harness();
        let item = h.larder.recipes.register_menu_item("Water").unwrap();

        let change = h
            .larder
            .availability
            .recompute_availability(item.id)
            .unwrap();

        assert!(!change.changed());
        assert!(change.current_status);
        assert_eq!(h.store.availability_writes().unwrap(), 0);
    }

    #[test]
    fn recompute_is_idempotent() {
        let h = harness();
        let flour = h
            .larder
            .catalog
            .create_ingredient(new_ingredient("Flour", "kg", "0.1", "0"), actor())
            .unwrap();
        let bread = h.larder.recipes.register_menu_item("Bread").unwrap();
        let subscription = h.bus.subscribe();
        h.larder
            .recipes
            .replace_recipe(bread.id, &[RecipeLine::new(flour.id_typed(), d("0.5"))])
            .unwrap();

        let first = h.larder.availability.recompute_availability(bread.id).unwrap();
        let second = h.larder.availability.recompute_availability(bread.id).unwrap();

        assert!(!first.current_status);
        assert_eq!(first.missing_ingredients.len(), 1);
        assert_eq!(first.current_status, second.current_status);
        assert!(!second.changed());
        assert_eq!(h.store.availability_writes().unwrap(), 1);
        assert_eq!(subscription.drain().len(), 1);
    }

    #[test]
    fn stock_change_on_shared_ingredient_reaches_every_item() {
        let h = harness();
        let cheese = h
            .larder
            .catalog
            .create_ingredient(new_ingredient("Cheese", "kg", "0", "0"), actor())
            .unwrap();
        let pizza = h.larder.recipes.register_menu_item("Pizza").unwrap();
        let toast = h.larder.recipes.register_menu_item("Toast").unwrap();
        for item in [&pizza, &toast] {
            h.larder
                .recipes
                .replace_recipe(item.id, &[RecipeLine::new(cheese.id_typed(), d("0.1"))])
                .unwrap();
        }

        h.larder
            .ledger
            .apply_movement(
                cheese.id_typed(),
                d("1"),
                MovementType::Purchase,
                larder_inventory::MovementContext::by(actor()),
            )
            .unwrap();
        let changes = h
            .larder
            .availability
            .recompute_for_ingredients(&[cheese.id_typed()])
            .unwrap();

        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.changed() && c.current_status));
    }

    #[test]
    fn sweep_reports_counts() {
        let h = harness();
        let flour = h
            .larder
            .catalog
            .create_ingredient(new_ingredient("Flour", "kg", "1", "0"), actor())
            .unwrap();
        let bread = h.larder.recipes.register_menu_item("Bread").unwrap();
        h.larder.recipes.register_menu_item("Water").unwrap();
        h.larder
            .recipes
            .replace_recipe(bread.id, &[RecipeLine::new(flour.id_typed(), d("0.5"))])
            .unwrap();

        let report = h.larder.availability.recompute_all().unwrap();
        assert_eq!(
            report,
            SweepReport {
                checked: 2,
                changed: 0,
                failed: 0
            }
        );
    }
}
