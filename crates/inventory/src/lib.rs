//! Inventory domain module.
//!
//! Ingredients, their append-only stock ledger rows, cost history and low-stock
//! detection, implemented as deterministic domain logic (no IO, no storage).

pub mod alert;
pub mod ingredient;
pub mod movement;
pub mod price;

pub use alert::{LowStockAlert, crossed_below};
pub use ingredient::{
    Ingredient, IngredientDetails, IngredientUpdate, NewIngredient, UpdatePlan, find_chain_break,
};
pub use movement::{ApplyMovement, MovementContext, MovementType, StockTransaction};
pub use price::{
    PriceChange, PriceChanged, PriceHistoryRecord, detect_price_change, normalize_price,
};
