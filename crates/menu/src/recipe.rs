//! Recipes: per-unit ingredient requirements of a menu item.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::{DomainError, IngredientId, MenuItemId};

use crate::stock::StockLookup;

/// Admin input for one recipe row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeLine {
    pub ingredient_id: IngredientId,
    /// Quantity needed for one unit of the menu item.
    pub quantity: Decimal,
    /// Must match the ingredient's unit when given; defaults to it otherwise.
    pub unit: Option<String>,
    pub notes: Option<String>,
}

impl RecipeLine {
    pub fn new(ingredient_id: IngredientId, quantity: Decimal) -> Self {
        Self {
            ingredient_id,
            quantity,
            unit: None,
            notes: None,
        }
    }
}

/// Stored recipe row. `(menu_item_id, ingredient_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub menu_item_id: MenuItemId,
    pub ingredient_id: IngredientId,
    pub quantity: Decimal,
    pub unit: String,
    pub notes: Option<String>,
}

/// Validate admin input into the full replacement row set for one menu item.
///
/// Every ingredient must exist (the error names the first unknown id) and be
/// active. An empty `lines` slice is valid and clears the recipe.
pub fn build_recipe<S>(
    menu_item_id: MenuItemId,
    lines: &[RecipeLine],
    stock: &S,
) -> Result<Vec<RecipeIngredient>, DomainError>
where
    S: StockLookup + ?Sized,
{
    let mut seen = HashSet::with_capacity(lines.len());
    let mut rows = Vec::with_capacity(lines.len());

    for line in lines {
        let ingredient = stock
            .ingredient(&line.ingredient_id)
            .ok_or_else(|| DomainError::not_found("ingredient", line.ingredient_id))?;

        if !ingredient.is_active() {
            return Err(DomainError::validation(format!(
                "ingredient {} ({}) is inactive",
                ingredient.name(),
                line.ingredient_id
            )));
        }
        if line.quantity <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "quantity for {} must be positive",
                ingredient.name()
            )));
        }
        if !seen.insert(line.ingredient_id) {
            return Err(DomainError::validation(format!(
                "ingredient {} appears more than once",
                ingredient.name()
            )));
        }
        let unit = match line.unit.as_deref().map(str::trim) {
            Some(unit) if unit != ingredient.unit() => {
                return Err(DomainError::validation(format!(
                    "unit {unit} does not match {} unit {}",
                    ingredient.name(),
                    ingredient.unit()
                )));
            }
            _ => ingredient.unit().to_string(),
        };

        rows.push(RecipeIngredient {
            menu_item_id,
            ingredient_id: line.ingredient_id,
            quantity: line.quantity,
            unit,
            notes: line.notes.clone(),
        });
    }

    Ok(rows)
}
