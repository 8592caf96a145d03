use std::collections::{BTreeSet, HashMap};

use larder_core::{IngredientId, MenuItemId};

use crate::recipe::RecipeIngredient;

/// Reverse index: ingredient → menu items whose recipe uses it.
///
/// Lets a stock change recompute only the affected menu items.
#[derive(Debug, Clone, Default)]
pub struct RecipeIndex {
    by_ingredient: HashMap<IngredientId, BTreeSet<MenuItemId>>,
    by_menu_item: HashMap<MenuItemId, Vec<IngredientId>>,
}

impl RecipeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the entries of one menu item for its new recipe.
    pub fn replace(&mut self, menu_item_id: MenuItemId, rows: &[RecipeIngredient]) {
        if let Some(old) = self.by_menu_item.remove(&menu_item_id) {
            for ingredient_id in old {
                if let Some(items) = self.by_ingredient.get_mut(&ingredient_id) {
                    items.remove(&menu_item_id);
                    if items.is_empty() {
                        self.by_ingredient.remove(&ingredient_id);
                    }
                }
            }
        }
        if rows.is_empty() {
            return;
        }
        let ingredients: Vec<IngredientId> = rows.iter().map(|r| r.ingredient_id).collect();
        for ingredient_id in &ingredients {
            self.by_ingredient
                .entry(*ingredient_id)
                .or_default()
                .insert(menu_item_id);
        }
        self.by_menu_item.insert(menu_item_id, ingredients);
    }

    /// Menu items using any of `ingredients`, deduplicated and sorted.
    pub fn menu_items_using(&self, ingredients: &[IngredientId]) -> Vec<MenuItemId> {
        let mut out = BTreeSet::new();
        for id in ingredients {
            if let Some(items) = self.by_ingredient.get(id) {
                out.extend(items.iter().copied());
            }
        }
        out.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn row(menu: MenuItemId, ing: IngredientId) -> RecipeIngredient {
        RecipeIngredient {
            menu_item_id: menu,
            ingredient_id: ing,
            quantity: Decimal::ONE,
            unit: "kg".to_string(),
            notes: None,
        }
    }

    #[test]
    fn shared_ingredient_maps_to_every_user() {
        let (flour, cheese) = (IngredientId::new(), IngredientId::new());
        let (pizza, bread) = (MenuItemId::new(), MenuItemId::new());
        let mut index = RecipeIndex::new();
        index.replace(pizza, &[row(pizza, flour), row(pizza, cheese)]);
        index.replace(bread, &[row(bread, flour)]);

        let mut expected = vec![pizza, bread];
        expected.sort();
        assert_eq!(index.menu_items_using(&[flour]), expected);
        assert_eq!(index.menu_items_using(&[cheese]), vec![pizza]);
        assert_eq!(index.menu_items_using(&[flour, cheese]), expected);
    }

    #[test]
    fn replace_drops_stale_entries() {
        let (flour, rice) = (IngredientId::new(), IngredientId::new());
        let dish = MenuItemId::new();
        let mut index = RecipeIndex::new();
        index.replace(dish, &[row(dish, flour)]);

        index.replace(dish, &[row(dish, rice)]);
        assert!(index.menu_items_using(&[flour]).is_empty());
        assert_eq!(index.menu_items_using(&[rice]), vec![dish]);

        index.replace(dish, &[]);
        assert!(index.menu_items_using(&[rice]).is_empty());
    }
}
