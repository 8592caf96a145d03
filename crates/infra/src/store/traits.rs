use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use larder_core::{IngredientId, MenuItemId, OrderId};
use larder_inventory::{Ingredient, IngredientDetails, PriceHistoryRecord, StockTransaction};
use larder_menu::{MenuItem, RecipeIngredient};

/// Store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to domain
/// errors (validation, invariants).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A compare-and-swap precondition no longer held (another writer got there first).
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    /// A uniqueness guard rejected the write (e.g. a reused idempotency key).
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Ledger rows to commit together.
///
/// Each row's `previous_quantity` is the CAS expectation for the ingredient's cached
/// stock and its `new_quantity` the value written. Rows for the same ingredient chain
/// in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockBatch {
    /// Refuse the batch if a batch with the same key was ever committed.
    pub idempotency_key: Option<String>,
    pub transactions: Vec<StockTransaction>,
}

/// Ingredients, their stock ledger and their price history.
///
/// Implementations must:
/// - commit a [`StockBatch`] atomically (all rows + all cached stock writes, or nothing)
/// - reject the whole batch with `Concurrency` if any CAS expectation fails
/// - never update or delete ledger or price history rows
pub trait IngredientStore: Send + Sync {
    /// Insert a new ingredient and, atomically with it, its opening ledger row.
    /// `ingredient` already carries the stock that row produced.
    fn insert_ingredient(
        &self,
        ingredient: &Ingredient,
        opening: Option<&StockTransaction>,
    ) -> Result<(), StoreError>;

    fn load_ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>, StoreError>;

    /// Load the ingredients that exist among `ids` (unknown ids are skipped).
    fn load_ingredients(&self, ids: &[IngredientId]) -> Result<Vec<Ingredient>, StoreError>;

    fn list_ingredients(&self) -> Result<Vec<Ingredient>, StoreError>;

    /// Persist admin edits (never stock), CAS on `expected` details. The price
    /// record, if any, is appended in the same atomic step.
    fn update_details(
        &self,
        id: IngredientId,
        expected: &IngredientDetails,
        details: &IngredientDetails,
        updated_at: DateTime<Utc>,
        price_record: Option<&PriceHistoryRecord>,
    ) -> Result<(), StoreError>;

    fn commit_stock(&self, batch: &StockBatch) -> Result<(), StoreError>;

    /// Ledger rows of one ingredient in commit order.
    fn load_transactions(&self, id: IngredientId) -> Result<Vec<StockTransaction>, StoreError>;

    /// Ingredient and its ledger rows read as one consistent snapshot.
    fn load_with_history(
        &self,
        id: IngredientId,
    ) -> Result<Option<(Ingredient, Vec<StockTransaction>)>, StoreError>;

    /// Ledger rows correlated with an order, in commit order.
    fn load_order_transactions(&self, order_id: OrderId) -> Result<Vec<StockTransaction>, StoreError>;

    /// Recovery only: overwrite the cached stock with the replayed ledger sum, CAS
    /// on the cached value the replay was compared against.
    fn repair_stock(
        &self,
        id: IngredientId,
        expected: Decimal,
        replayed: Decimal,
    ) -> Result<(), StoreError>;

    fn load_price_history(&self, id: IngredientId) -> Result<Vec<PriceHistoryRecord>, StoreError>;
}

/// Menu items, their recipes and the ingredient → menu item reverse lookup.
pub trait RecipeStore: Send + Sync {
    fn insert_menu_item(&self, item: &MenuItem) -> Result<(), StoreError>;

    fn load_menu_item(&self, id: MenuItemId) -> Result<Option<MenuItem>, StoreError>;

    fn list_menu_items(&self) -> Result<Vec<MenuItem>, StoreError>;

    /// Write the derived flag only if it differs. Returns whether a write happened.
    fn set_availability(&self, id: MenuItemId, is_available: bool) -> Result<bool, StoreError>;

    /// Recipe rows in insertion order; empty when no recipe is defined.
    fn load_recipe(&self, id: MenuItemId) -> Result<Vec<RecipeIngredient>, StoreError>;

    /// Recipes of several menu items; items without rows map to an empty vec.
    fn load_recipes(
        &self,
        ids: &[MenuItemId],
    ) -> Result<HashMap<MenuItemId, Vec<RecipeIngredient>>, StoreError>;

    /// Atomically delete every row of the menu item and insert `rows`.
    fn replace_recipe(&self, id: MenuItemId, rows: &[RecipeIngredient]) -> Result<(), StoreError>;

    /// Menu items whose recipe uses any of `ingredients` (deduplicated).
    fn menu_items_using(&self, ingredients: &[IngredientId]) -> Result<Vec<MenuItemId>, StoreError>;
}
