//! Order lines → aggregated ingredient requirements.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::{DomainError, IngredientId, MenuItemId};

use crate::recipe::RecipeIngredient;
use crate::stock::StockLookup;

/// One line of an order: `quantity` units of a menu item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub menu_item_id: MenuItemId,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(menu_item_id: MenuItemId, quantity: u32) -> Self {
        Self {
            menu_item_id,
            quantity,
        }
    }
}

pub fn validate_order_lines(lines: &[OrderLine]) -> Result<(), DomainError> {
    if lines.is_empty() {
        return Err(DomainError::validation("order has no lines"));
    }
    if let Some(line) = lines.iter().find(|l| l.quantity == 0) {
        return Err(DomainError::validation(format!(
            "quantity for menu item {} must be positive",
            line.menu_item_id
        )));
    }
    Ok(())
}

/// Total amount of one ingredient needed by a whole order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedRequirement {
    pub ingredient_id: IngredientId,
    pub unit: String,
    pub required: Decimal,
    /// Menu items contributing to this requirement, in first-appearance order.
    pub menu_items: Vec<MenuItemId>,
}

/// Sum `recipe quantity × line quantity` per ingredient across all lines.
///
/// Output order is first appearance (line order, then recipe row order). A line
/// whose menu item has no recipe rows fails with `NotFound("recipe", ..)`.
pub fn aggregate_requirements(
    lines: &[OrderLine],
    recipes: &HashMap<MenuItemId, Vec<RecipeIngredient>>,
) -> Result<Vec<AggregatedRequirement>, DomainError> {
    let mut out: Vec<AggregatedRequirement> = Vec::new();
    let mut index: HashMap<IngredientId, usize> = HashMap::new();

    for line in lines {
        let recipe = recipes
            .get(&line.menu_item_id)
            .filter(|rows| !rows.is_empty())
            .ok_or_else(|| DomainError::not_found("recipe", line.menu_item_id))?;

        let units = Decimal::from(line.quantity);
        for row in recipe {
            let amount = row
                .quantity
                .checked_mul(units)
                .ok_or_else(DomainError::quantity_out_of_range)?;
            match index.get(&row.ingredient_id) {
                Some(&idx) => {
                    let req = &mut out[idx];
                    req.required = req
                        .required
                        .checked_add(amount)
                        .ok_or_else(DomainError::quantity_out_of_range)?;
                    if !req.menu_items.contains(&line.menu_item_id) {
                        req.menu_items.push(line.menu_item_id);
                    }
                }
                None => {
                    index.insert(row.ingredient_id, out.len());
                    out.push(AggregatedRequirement {
                        ingredient_id: row.ingredient_id,
                        unit: row.unit.clone(),
                        required: amount,
                        menu_items: vec![line.menu_item_id],
                    });
                }
            }
        }
    }

    Ok(out)
}

/// Requirement of one ingredient against current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientRequirement {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub unit: String,
    pub required: Decimal,
    pub available: Decimal,
}

/// An ingredient whose stock does not cover what is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingIngredient {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub unit: String,
    pub required: Decimal,
    pub available: Decimal,
    pub shortfall: Decimal,
}

impl MissingIngredient {
    pub fn new(
        ingredient_id: IngredientId,
        name: impl Into<String>,
        unit: impl Into<String>,
        required: Decimal,
        available: Decimal,
    ) -> Self {
        Self {
            ingredient_id,
            name: name.into(),
            unit: unit.into(),
            required,
            available,
            shortfall: required - available,
        }
    }
}

impl core::fmt::Display for MissingIngredient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "missing {} {} of {}",
            self.shortfall.normalize(),
            self.unit,
            self.name
        )
    }
}

/// Answer to "can this order be made from current stock?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementsReport {
    pub required: Vec<IngredientRequirement>,
    pub missing: Vec<MissingIngredient>,
    pub can_fulfill: bool,
}

impl RequirementsReport {
    /// Compare aggregated requirements with a stock snapshot.
    pub fn evaluate<S>(aggregated: &[AggregatedRequirement], stock: &S) -> Result<Self, DomainError>
    where
        S: StockLookup + ?Sized,
    {
        let mut required = Vec::with_capacity(aggregated.len());
        let mut missing = Vec::new();

        for req in aggregated {
            let ingredient = stock
                .ingredient(&req.ingredient_id)
                .ok_or_else(|| DomainError::not_found("ingredient", req.ingredient_id))?;
            let available = ingredient.current_stock();

            if req.required > available {
                missing.push(MissingIngredient::new(
                    req.ingredient_id,
                    ingredient.name(),
                    ingredient.unit(),
                    req.required,
                    available,
                ));
            }
            required.push(IngredientRequirement {
                ingredient_id: req.ingredient_id,
                name: ingredient.name().to_string(),
                unit: ingredient.unit().to_string(),
                required: req.required,
                available,
            });
        }

        Ok(Self {
            can_fulfill: missing.is_empty(),
            required,
            missing,
        })
    }
}

impl core::fmt::Display for RequirementsReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.can_fulfill {
            return f.write_str("can fulfill");
        }
        f.write_str("cannot fulfill: ")?;
        for (idx, m) in self.missing.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{m}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::fixtures::ingredient;
    use larder_inventory::Ingredient;

    fn row(menu: MenuItemId, ing: &Ingredient, qty: Decimal) -> RecipeIngredient {
        RecipeIngredient {
            menu_item_id: menu,
            ingredient_id: ing.id_typed(),
            quantity: qty,
            unit: ing.unit().to_string(),
            notes: None,
        }
    }

    fn stock_of(items: &[Ingredient]) -> HashMap<IngredientId, Ingredient> {
        items.iter().map(|i| (i.id_typed(), i.clone())).collect()
    }

    #[test]
    fn pizza_order_reports_flour_shortfall() {
        let flour = ingredient("Flour", Decimal::new(15, 1));
        let cheese = ingredient("Cheese", Decimal::from(5));
        let pizza = MenuItemId::new();
        let recipes = HashMap::from([(
            pizza,
            vec![
                row(pizza, &flour, Decimal::new(2, 1)),
                row(pizza, &cheese, Decimal::new(1, 1)),
            ],
        )]);

        let agg = aggregate_requirements(&[OrderLine::new(pizza, 10)], &recipes).unwrap();
        let report = RequirementsReport::evaluate(&agg, &stock_of(&[flour.clone(), cheese])).unwrap();

        assert!(!report.can_fulfill);
        assert_eq!(report.required.len(), 2);
        assert_eq!(report.missing.len(), 1);
        let m = &report.missing[0];
        assert_eq!(m.ingredient_id, flour.id_typed());
        assert_eq!(m.required, Decimal::from(2));
        assert_eq!(m.available, Decimal::new(15, 1));
        assert_eq!(m.shortfall, Decimal::new(5, 1));
        assert_eq!(report.to_string(), "cannot fulfill: missing 0.5 kg of Flour");
    }

    #[test]
    fn shared_ingredient_is_summed_across_lines() {
        let flour = ingredient("Flour", Decimal::from(100));
        let pizza = MenuItemId::new();
        let bread = MenuItemId::new();
        let recipes = HashMap::from([
            (pizza, vec![row(pizza, &flour, Decimal::new(2, 1))]),
            (bread, vec![row(bread, &flour, Decimal::new(5, 1))]),
        ]);

        let agg = aggregate_requirements(
            &[OrderLine::new(pizza, 2), OrderLine::new(bread, 3), OrderLine::new(pizza, 1)],
            &recipes,
        )
        .unwrap();

        assert_eq!(agg.len(), 1);
        assert_eq!(agg[0].required, Decimal::new(21, 1));
        assert_eq!(agg[0].menu_items, vec![pizza, bread]);
    }

    #[test]
    fn exact_stock_is_enough() {
        let flour = ingredient("Flour", Decimal::from(2));
        let pizza = MenuItemId::new();
        let recipes = HashMap::from([(pizza, vec![row(pizza, &flour, Decimal::ONE)])]);
        let agg = aggregate_requirements(&[OrderLine::new(pizza, 2)], &recipes).unwrap();
        let report = RequirementsReport::evaluate(&agg, &stock_of(&[flour])).unwrap();
        assert!(report.can_fulfill);
        assert!(report.missing.is_empty());
        assert_eq!(report.to_string(), "can fulfill");
    }

    #[test]
    fn menu_item_without_recipe_is_an_error() {
        let salad = MenuItemId::new();
        let recipes = HashMap::from([(salad, Vec::new())]);
        let err = aggregate_requirements(&[OrderLine::new(salad, 1)], &recipes).unwrap_err();
        assert_eq!(err, DomainError::not_found("recipe", salad));
    }

    #[test]
    fn oversized_line_is_rejected_not_panicking() {
        let flour = ingredient("Flour", Decimal::from(1));
        let pizza = MenuItemId::new();
        let recipes = HashMap::from([(pizza, vec![row(pizza, &flour, Decimal::from_i128_with_scale(10i128.pow(20), 0))])]);

        let err = aggregate_requirements(&[OrderLine::new(pizza, u32::MAX)], &recipes).unwrap_err();

        assert_eq!(err, DomainError::quantity_out_of_range());
    }

    #[test]
    fn overflowing_sum_across_lines_is_rejected() {
        let flour = ingredient("Flour", Decimal::from(1));
        let pizza = MenuItemId::new();
        let per_unit = Decimal::from_i128_with_scale(5 * 10i128.pow(28), 0);
        let recipes = HashMap::from([(pizza, vec![row(pizza, &flour, per_unit)])]);

        let err = aggregate_requirements(&[OrderLine::new(pizza, 1), OrderLine::new(pizza, 1)], &recipes)
            .unwrap_err();

        assert_eq!(err, DomainError::quantity_out_of_range());
    }

    #[test]
    fn order_lines_are_validated() {
        assert!(validate_order_lines(&[]).is_err());
        assert!(validate_order_lines(&[OrderLine::new(MenuItemId::new(), 0)]).is_err());
        assert!(validate_order_lines(&[OrderLine::new(MenuItemId::new(), 1)]).is_ok());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 300,
                ..ProptestConfig::default()
            })]

            /// Property: aggregated requirement equals the per-line sum, whatever the line order.
            #[test]
            fn aggregation_matches_per_line_sum(
                quantities in prop::collection::vec((0usize..3, 1u32..20), 1..12),
                per_unit in prop::collection::vec(1i64..500, 3),
            ) {
                let flour = ingredient("Flour", Decimal::ZERO);
                let items: Vec<MenuItemId> = (0..3).map(|_| MenuItemId::new()).collect();
                let recipes: HashMap<_, _> = items
                    .iter()
                    .zip(&per_unit)
                    .map(|(id, q)| (*id, vec![row(*id, &flour, Decimal::new(*q, 2))]))
                    .collect();
                let lines: Vec<OrderLine> = quantities
                    .iter()
                    .map(|(item, qty)| OrderLine::new(items[*item], *qty))
                    .collect();

                let expected: Decimal = quantities
                    .iter()
                    .map(|(item, qty)| Decimal::new(per_unit[*item], 2) * Decimal::from(*qty))
                    .sum();

                let forward = aggregate_requirements(&lines, &recipes).unwrap();
                let mut reversed_lines = lines.clone();
                reversed_lines.reverse();
                let backward = aggregate_requirements(&reversed_lines, &recipes).unwrap();

                prop_assert_eq!(forward.len(), 1);
                prop_assert_eq!(forward[0].required, expected);
                prop_assert_eq!(backward[0].required, expected);
            }
        }
    }
}
