//! Low-stock detection.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::IngredientId;

use crate::ingredient::Ingredient;
use crate::movement::StockTransaction;

/// Edge trigger: a decrease from at-or-above the threshold to below it.
pub fn crossed_below(previous: Decimal, new: Decimal, threshold: Decimal) -> bool {
    new < previous && previous >= threshold && new < threshold
}

/// Notification payload: an ingredient dropped below its minimum level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub unit: String,
    pub current_quantity: Decimal,
    pub threshold: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl LowStockAlert {
    fn for_ingredient(ingredient: &Ingredient, quantity: Decimal, at: DateTime<Utc>) -> Self {
        Self {
            ingredient_id: ingredient.id_typed(),
            name: ingredient.name().to_string(),
            unit: ingredient.unit().to_string(),
            current_quantity: quantity,
            threshold: ingredient.min_stock_level(),
            occurred_at: at,
        }
    }

    /// Alert for a committed write, if that write is the one that crossed the threshold.
    pub fn on_write(ingredient: &Ingredient, tx: &StockTransaction) -> Option<Self> {
        crossed_below(tx.previous_quantity, tx.new_quantity, ingredient.min_stock_level())
            .then(|| Self::for_ingredient(ingredient, tx.new_quantity, tx.occurred_at))
    }

    /// Level check used by the periodic safety-net sweep.
    pub fn on_sweep(ingredient: &Ingredient, at: DateTime<Utc>) -> Option<Self> {
        (ingredient.is_active() && ingredient.is_below_minimum())
            .then(|| Self::for_ingredient(ingredient, ingredient.current_stock(), at))
    }
}
