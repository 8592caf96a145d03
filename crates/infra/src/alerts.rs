//! Alert Emitter: low-stock notifications.
//!
//! Edge-triggered on the committed write that crosses an ingredient's minimum level;
//! the periodic sweep re-emits for everything still below as a safety net.

use chrono::{DateTime, Utc};
use tracing::info;

use larder_events::EventBus;
use larder_inventory::{Ingredient, LowStockAlert, StockTransaction};

use crate::notify::{InventoryNotification, NotificationEnvelope, Notifier};

#[derive(Debug, Clone)]
pub struct AlertEmitter<B> {
    notifier: Notifier<B>,
}

impl<B> AlertEmitter<B>
where
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(notifier: Notifier<B>) -> Self {
        Self { notifier }
    }

    /// Check a committed ledger row. `ingredient` is the post-commit state.
    pub fn on_committed(&self, ingredient: &Ingredient, tx: &StockTransaction) -> bool {
        let Some(alert) = LowStockAlert::on_write(ingredient, tx) else {
            return false;
        };
        info!(
            ingredient_id = %alert.ingredient_id,
            name = %alert.name,
            current = %alert.current_quantity,
            threshold = %alert.threshold,
            "ingredient dropped below minimum stock"
        );
        self.notifier.publish(InventoryNotification::LowStock(alert));
        true
    }

    /// Re-emit for every active ingredient currently below its threshold.
    pub fn sweep(&self, ingredients: &[Ingredient], at: DateTime<Utc>) -> usize {
        let mut emitted = 0;
        for alert in ingredients
            .iter()
            .filter_map(|ingredient| LowStockAlert::on_sweep(ingredient, at))
        {
            self.notifier.publish(InventoryNotification::LowStock(alert));
            emitted += 1;
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use larder_core::{Aggregate, IngredientId, TransactionId, UserId};
    use larder_events::InMemoryEventBus;
    use larder_inventory::{ApplyMovement, MovementContext, MovementType, NewIngredient};
    use rust_decimal::Decimal;

    use super::*;

    fn flour(stock: i64, min: i64) -> Ingredient {
        let mut ingredient = Ingredient::create(
            IngredientId::new(),
            &NewIngredient {
                name: "Flour".to_string(),
                unit: "kg".to_string(),
                min_stock_level: Decimal::from(min),
                cost_per_unit: None,
                opening_stock: Decimal::ZERO,
            },
            Utc::now(),
        )
        .unwrap();
        if stock > 0 {
            let txs = ingredient
                .handle(&ApplyMovement {
                    ingredient_id: ingredient.id_typed(),
                    transaction_id: TransactionId::new(),
                    movement_type: MovementType::AdjustmentIn,
                    delta: Decimal::from(stock),
                    context: MovementContext::by(UserId::new()),
                    occurred_at: Utc::now(),
                })
                .unwrap();
            ingredient.apply(&txs[0]);
        }
        ingredient
    }

    #[test]
    fn sweep_skips_inactive_and_healthy_ingredients() {
        let bus = Arc::new(InMemoryEventBus::<NotificationEnvelope>::new());
        let subscription = bus.subscribe();
        let emitter = AlertEmitter::new(Notifier::new(bus));

        let low = flour(2, 5);
        let healthy = flour(9, 5);
        let mut details = flour(1, 5).details().clone();
        details.is_active = false;
        let inactive = flour(1, 5).with_details(details, Utc::now());

        assert_eq!(emitter.sweep(&[low, healthy, inactive], Utc::now()), 1);
        assert_eq!(subscription.drain().len(), 1);
    }
}
