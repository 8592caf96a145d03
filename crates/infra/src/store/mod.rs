//! Persistence boundary for the inventory core.
//!
//! Two traits split by concern: [`IngredientStore`] (snapshot + append-only ledger
//! + price history) and [`RecipeStore`] (menu items, recipes, reverse lookup).
//! Both are synchronous and `Send + Sync` so services can be shared across request
//! threads behind an `Arc`.

pub mod in_memory;
pub mod postgres;
pub mod traits;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use traits::{IngredientStore, RecipeStore, StockBatch, StoreError};
