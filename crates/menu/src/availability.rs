//! Derived menu item availability.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::MenuItemId;

use crate::recipe::RecipeIngredient;
use crate::requirements::MissingIngredient;
use crate::stock::StockLookup;

/// Availability computed from a recipe and a stock snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub is_available: bool,
    pub missing: Vec<MissingIngredient>,
}

/// Evaluate whether one unit of a menu item can be made.
///
/// `None` for an empty recipe: availability is then left as it is. An ingredient
/// that no longer exists counts as missing with nothing available.
pub fn evaluate_availability<S>(recipe: &[RecipeIngredient], stock: &S) -> Option<Availability>
where
    S: StockLookup + ?Sized,
{
    if recipe.is_empty() {
        return None;
    }

    let missing: Vec<MissingIngredient> = recipe
        .iter()
        .filter_map(|row| match stock.ingredient(&row.ingredient_id) {
            Some(ing) if ing.current_stock() >= row.quantity => None,
            Some(ing) => Some(MissingIngredient::new(
                row.ingredient_id,
                ing.name(),
                ing.unit(),
                row.quantity,
                ing.current_stock(),
            )),
            None => Some(MissingIngredient::new(
                row.ingredient_id,
                row.ingredient_id.to_string(),
                row.unit.clone(),
                row.quantity,
                Decimal::ZERO,
            )),
        })
        .collect();

    Some(Availability {
        is_available: missing.is_empty(),
        missing,
    })
}

/// Result of one recompute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityChange {
    pub menu_item_id: MenuItemId,
    pub previous_status: bool,
    pub current_status: bool,
    pub missing_ingredients: Vec<MissingIngredient>,
}

impl AvailabilityChange {
    pub fn changed(&self) -> bool {
        self.previous_status != self.current_status
    }
}

/// Notification payload: a menu item flipped availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityChanged {
    pub menu_item_id: MenuItemId,
    pub name: String,
    pub is_available: bool,
    pub missing_ingredients: Vec<MissingIngredient>,
    pub occurred_at: DateTime<Utc>,
}
