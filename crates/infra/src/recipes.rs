//! Recipe Registry: menu items and the ingredient quantities they consume.
//!
//! Recipes are unversioned. Replacing one is destructive going forward; ledger rows
//! already written keep the quantities actually consumed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use larder_core::{IngredientId, MenuItemId};
use larder_events::EventBus;
use larder_inventory::Ingredient;
use larder_menu::{MenuItem, RecipeIngredient, RecipeLine, build_recipe};

use crate::availability::AvailabilityCascade;
use crate::error::ServiceError;
use crate::notify::NotificationEnvelope;
use crate::store::{IngredientStore, RecipeStore};

#[derive(Debug)]
pub struct RecipeRegistry<S, B> {
    store: Arc<S>,
    cascade: AvailabilityCascade<S, B>,
}

impl<S, B: Clone> Clone for RecipeRegistry<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cascade: self.cascade.clone(),
        }
    }
}

impl<S, B> RecipeRegistry<S, B>
where
    S: IngredientStore + RecipeStore,
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(store: Arc<S>, cascade: AvailabilityCascade<S, B>) -> Self {
        Self { store, cascade }
    }

    pub fn register_menu_item(&self, name: &str) -> Result<MenuItem, ServiceError> {
        let item = MenuItem::new(MenuItemId::new(), name, Utc::now())?;
        self.store.insert_menu_item(&item)?;
        info!(menu_item_id = %item.id, name = %item.name, "menu item registered");
        Ok(item)
    }

    pub fn menu_item(&self, menu_item_id: MenuItemId) -> Result<MenuItem, ServiceError> {
        self.store
            .load_menu_item(menu_item_id)?
            .ok_or_else(|| ServiceError::not_found("menu item", menu_item_id))
    }

    pub fn menu_items(&self) -> Result<Vec<MenuItem>, ServiceError> {
        Ok(self.store.list_menu_items()?)
    }

    /// Recipe rows in order; empty means no recipe is defined.
    pub fn get_recipe(&self, menu_item_id: MenuItemId) -> Result<Vec<RecipeIngredient>, ServiceError> {
        self.menu_item(menu_item_id)?;
        Ok(self.store.load_recipe(menu_item_id)?)
    }

    /// Validate and atomically replace a menu item's whole recipe, then recompute its
    /// availability. An empty `lines` slice clears the recipe.
    pub fn replace_recipe(
        &self,
        menu_item_id: MenuItemId,
        lines: &[RecipeLine],
    ) -> Result<Vec<RecipeIngredient>, ServiceError> {
        self.menu_item(menu_item_id)?;

        let ids: Vec<IngredientId> = lines.iter().map(|line| line.ingredient_id).collect();
        let stock: HashMap<IngredientId, Ingredient> = self
            .store
            .load_ingredients(&ids)?
            .into_iter()
            .map(|ingredient| (ingredient.id_typed(), ingredient))
            .collect();
        let rows = build_recipe(menu_item_id, lines, &stock)?;

        self.store.replace_recipe(menu_item_id, &rows)?;
        info!(%menu_item_id, rows = rows.len(), "recipe replaced");

        if let Err(err) = self.cascade.recompute_availability(menu_item_id) {
            warn!(%menu_item_id, error = %err, "availability recompute after recipe edit failed");
        }
        Ok(rows)
    }
}
