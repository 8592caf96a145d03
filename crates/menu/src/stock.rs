use std::collections::HashMap;

use larder_core::IngredientId;
use larder_inventory::Ingredient;

/// Read access to a snapshot of ingredient state.
pub trait StockLookup {
    fn ingredient(&self, id: &IngredientId) -> Option<&Ingredient>;
}

impl StockLookup for HashMap<IngredientId, Ingredient> {
    fn ingredient(&self, id: &IngredientId) -> Option<&Ingredient> {
        self.get(id)
    }
}
