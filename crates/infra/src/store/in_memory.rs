use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use larder_core::{Aggregate, IngredientId, MenuItemId, OrderId};
use larder_inventory::{Ingredient, IngredientDetails, PriceHistoryRecord, StockTransaction};
use larder_menu::{MenuItem, RecipeIndex, RecipeIngredient};

use super::traits::{IngredientStore, RecipeStore, StockBatch, StoreError};

#[derive(Debug, Default)]
struct State {
    ingredients: HashMap<IngredientId, Ingredient>,
    /// Ledger rows in global commit order.
    transactions: Vec<StockTransaction>,
    batch_keys: HashSet<String>,
    price_history: Vec<PriceHistoryRecord>,
    menu_items: HashMap<MenuItemId, MenuItem>,
    recipes: HashMap<MenuItemId, Vec<RecipeIngredient>>,
    index: RecipeIndex,
    availability_writes: u64,
}

/// In-memory inventory store.
///
/// One `RwLock` guards everything, so every trait call is atomic. Intended for
/// tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

fn ingredient_not_found(id: IngredientId) -> StoreError {
    StoreError::NotFound {
        entity: "ingredient",
        id: id.to_string(),
    }
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of availability flag writes performed so far.
    pub fn availability_writes(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().map_err(|_| poisoned())?.availability_writes)
    }

    /// Simulate an out-of-band edit of the cached stock column.
    #[cfg(test)]
    pub(crate) fn corrupt_cached_stock(&self, id: IngredientId, value: Decimal) {
        let mut state = self.state.write().unwrap();
        let ingredient = state.ingredients.get(&id).cloned().unwrap();
        let corrupted = Ingredient::restore(
            id,
            ingredient.details().clone(),
            value,
            ingredient.created_at(),
            ingredient.updated_at(),
        );
        state.ingredients.insert(id, corrupted);
    }
}

impl IngredientStore for InMemoryInventoryStore {
    fn insert_ingredient(
        &self,
        ingredient: &Ingredient,
        opening: Option<&StockTransaction>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let id = ingredient.id_typed();
        if state.ingredients.contains_key(&id) {
            return Err(StoreError::Duplicate(format!("ingredient {id}")));
        }
        state.ingredients.insert(id, ingredient.clone());
        state.transactions.extend(opening.cloned());
        Ok(())
    }

    fn load_ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.ingredients.get(&id).cloned())
    }

    fn load_ingredients(&self, ids: &[IngredientId]) -> Result<Vec<Ingredient>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut seen = HashSet::with_capacity(ids.len());
        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| state.ingredients.get(id).cloned())
            .collect())
    }

    fn list_ingredients(&self) -> Result<Vec<Ingredient>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut all: Vec<Ingredient> = state.ingredients.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()).then(a.id_typed().cmp(&b.id_typed())));
        Ok(all)
    }

    fn update_details(
        &self,
        id: IngredientId,
        expected: &IngredientDetails,
        details: &IngredientDetails,
        updated_at: DateTime<Utc>,
        price_record: Option<&PriceHistoryRecord>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let current = state
            .ingredients
            .get(&id)
            .cloned()
            .ok_or_else(|| ingredient_not_found(id))?;
        if current.details() != expected {
            return Err(StoreError::Concurrency(format!(
                "ingredient {id} details changed concurrently"
            )));
        }
        state
            .ingredients
            .insert(id, current.with_details(details.clone(), updated_at));
        if let Some(record) = price_record {
            state.price_history.push(record.clone());
        }
        Ok(())
    }

    fn commit_stock(&self, batch: &StockBatch) -> Result<(), StoreError> {
        if batch.transactions.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().map_err(|_| poisoned())?;

        if let Some(key) = &batch.idempotency_key {
            if state.batch_keys.contains(key) {
                return Err(StoreError::Duplicate(format!("batch {key}")));
            }
        }

        // Validate every CAS against a scratch copy first; nothing is written
        // unless the whole batch holds.
        let mut staged: HashMap<IngredientId, Ingredient> = HashMap::new();
        for tx in &batch.transactions {
            let ingredient = match staged.entry(tx.ingredient_id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(
                    state
                        .ingredients
                        .get(&tx.ingredient_id)
                        .cloned()
                        .ok_or_else(|| ingredient_not_found(tx.ingredient_id))?,
                ),
            };
            if ingredient.current_stock() != tx.previous_quantity {
                return Err(StoreError::Concurrency(format!(
                    "ingredient {}: expected stock {}, found {}",
                    tx.ingredient_id,
                    tx.previous_quantity,
                    ingredient.current_stock()
                )));
            }
            ingredient.apply(tx);
        }

        state.ingredients.extend(staged);
        state.transactions.extend(batch.transactions.iter().cloned());
        if let Some(key) = &batch.idempotency_key {
            state.batch_keys.insert(key.clone());
        }
        Ok(())
    }

    fn load_transactions(&self, id: IngredientId) -> Result<Vec<StockTransaction>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.ingredient_id == id)
            .cloned()
            .collect())
    }

    fn load_with_history(
        &self,
        id: IngredientId,
    ) -> Result<Option<(Ingredient, Vec<StockTransaction>)>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.ingredients.get(&id).map(|ingredient| {
            let history = state
                .transactions
                .iter()
                .filter(|tx| tx.ingredient_id == id)
                .cloned()
                .collect();
            (ingredient.clone(), history)
        }))
    }

    fn load_order_transactions(&self, order_id: OrderId) -> Result<Vec<StockTransaction>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    fn repair_stock(
        &self,
        id: IngredientId,
        expected: Decimal,
        replayed: Decimal,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let current = state
            .ingredients
            .get(&id)
            .cloned()
            .ok_or_else(|| ingredient_not_found(id))?;
        if current.current_stock() != expected {
            return Err(StoreError::Concurrency(format!(
                "ingredient {id}: expected stock {expected}, found {}",
                current.current_stock()
            )));
        }
        let repaired = Ingredient::restore(
            id,
            current.details().clone(),
            replayed,
            current.created_at(),
            current.updated_at(),
        );
        state.ingredients.insert(id, repaired);
        Ok(())
    }

    fn load_price_history(&self, id: IngredientId) -> Result<Vec<PriceHistoryRecord>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .price_history
            .iter()
            .filter(|r| r.ingredient_id == id)
            .cloned()
            .collect())
    }
}

impl RecipeStore for InMemoryInventoryStore {
    fn insert_menu_item(&self, item: &MenuItem) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if state.menu_items.contains_key(&item.id) {
            return Err(StoreError::Duplicate(format!("menu item {}", item.id)));
        }
        state.menu_items.insert(item.id, item.clone());
        Ok(())
    }

    fn load_menu_item(&self, id: MenuItemId) -> Result<Option<MenuItem>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.menu_items.get(&id).cloned())
    }

    fn list_menu_items(&self) -> Result<Vec<MenuItem>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut all: Vec<MenuItem> = state.menu_items.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    fn set_availability(&self, id: MenuItemId, is_available: bool) -> Result<bool, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let item = state.menu_items.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "menu item",
            id: id.to_string(),
        })?;
        if item.is_available == is_available {
            return Ok(false);
        }
        item.is_available = is_available;
        state.availability_writes += 1;
        Ok(true)
    }

    fn load_recipe(&self, id: MenuItemId) -> Result<Vec<RecipeIngredient>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.recipes.get(&id).cloned().unwrap_or_default())
    }

    fn load_recipes(
        &self,
        ids: &[MenuItemId],
    ) -> Result<HashMap<MenuItemId, Vec<RecipeIngredient>>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(ids
            .iter()
            .map(|id| (*id, state.recipes.get(id).cloned().unwrap_or_default()))
            .collect())
    }

    fn replace_recipe(&self, id: MenuItemId, rows: &[RecipeIngredient]) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.menu_items.contains_key(&id) {
            return Err(StoreError::NotFound {
                entity: "menu item",
                id: id.to_string(),
            });
        }
        if rows.iter().any(|r| r.menu_item_id != id) {
            return Err(StoreError::Backend(format!(
                "recipe rows for {id} reference another menu item"
            )));
        }
        state.index.replace(id, rows);
        if rows.is_empty() {
            state.recipes.remove(&id);
        } else {
            state.recipes.insert(id, rows.to_vec());
        }
        Ok(())
    }

    fn menu_items_using(&self, ingredients: &[IngredientId]) -> Result<Vec<MenuItemId>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.index.menu_items_using(ingredients))
    }
}
