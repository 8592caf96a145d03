//! Menu domain module.
//!
//! Menu items, their recipes, order requirement aggregation and derived
//! availability. Pure domain logic over a stock snapshot (no IO, no storage).

pub mod availability;
pub mod index;
pub mod menu_item;
pub mod recipe;
pub mod requirements;
pub mod stock;

pub use availability::{Availability, AvailabilityChange, AvailabilityChanged, evaluate_availability};
pub use index::RecipeIndex;
pub use menu_item::MenuItem;
pub use recipe::{RecipeIngredient, RecipeLine, build_recipe};
pub use requirements::{
    AggregatedRequirement, IngredientRequirement, MissingIngredient, OrderLine, RequirementsReport,
    aggregate_requirements, validate_order_lines,
};
pub use stock::StockLookup;
