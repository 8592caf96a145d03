//! Consumption Engine: order lines → aggregated ingredient requirements → one atomic
//! ledger commit.
//!
//! `calculate_requirements` is advisory. `commit_consumption` never trusts it: stock
//! is re-read and every deduction re-decided inside the ledger's CAS loop, so the
//! check and the write cannot race. After a durable commit the Availability Cascade
//! recomputes every menu item sharing a consumed ingredient; a cascade failure is only
//! logged because the periodic sweep heals it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use larder_core::{IngredientId, MenuItemId, OrderId, UserId};
use larder_events::EventBus;
use larder_inventory::{Ingredient, MovementContext, MovementType};
use larder_menu::{
    AggregatedRequirement, AvailabilityChange, OrderLine, RequirementsReport,
    aggregate_requirements, validate_order_lines,
};

use crate::availability::AvailabilityCascade;
use crate::error::ServiceError;
use crate::ledger::{MovementOutcome, MovementRequest, StockLedger};
use crate::notify::NotificationEnvelope;
use crate::store::{IngredientStore, RecipeStore};

/// What a committed consumption (or reversal) did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionReceipt {
    pub order_id: OrderId,
    /// One row per aggregated ingredient, in requirement order.
    pub movements: Vec<MovementOutcome>,
    pub availability_changes: Vec<AvailabilityChange>,
}

impl ConsumptionReceipt {
    pub fn consumed(&self, ingredient_id: IngredientId) -> Option<Decimal> {
        self.movements
            .iter()
            .find(|m| m.transaction.ingredient_id == ingredient_id)
            .map(|m| m.transaction.quantity.abs())
    }
}

pub fn consume_key(order_id: OrderId) -> String {
    format!("consume:{order_id}")
}

pub fn reverse_key(order_id: OrderId) -> String {
    format!("reverse:{order_id}")
}

#[derive(Debug)]
pub struct ConsumptionEngine<S, B> {
    store: Arc<S>,
    ledger: StockLedger<S, B>,
    cascade: AvailabilityCascade<S, B>,
}

impl<S, B: Clone> Clone for ConsumptionEngine<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ledger: self.ledger.clone(),
            cascade: self.cascade.clone(),
        }
    }
}

impl<S, B> ConsumptionEngine<S, B>
where
    S: IngredientStore + RecipeStore,
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(
        store: Arc<S>,
        ledger: StockLedger<S, B>,
        cascade: AvailabilityCascade<S, B>,
    ) -> Self {
        Self {
            store,
            ledger,
            cascade,
        }
    }

    /// Can current stock cover this order? Nothing is written.
    pub fn calculate_requirements(
        &self,
        lines: &[OrderLine],
    ) -> Result<RequirementsReport, ServiceError> {
        let aggregated = self.aggregate(lines)?;
        let ids: Vec<IngredientId> = aggregated.iter().map(|r| r.ingredient_id).collect();
        let stock: HashMap<IngredientId, Ingredient> = self
            .store
            .load_ingredients(&ids)?
            .into_iter()
            .map(|ingredient| (ingredient.id_typed(), ingredient))
            .collect();
        Ok(RequirementsReport::evaluate(&aggregated, &stock)?)
    }

    /// Deduct everything the order needs in one all-or-nothing ledger commit.
    ///
    /// Fails with `InsufficientStock` (nothing written) if any ingredient would go
    /// negative, and with `Conflict` if this order was already consumed.
    pub fn commit_consumption(
        &self,
        order_id: OrderId,
        lines: &[OrderLine],
        actor_id: UserId,
    ) -> Result<ConsumptionReceipt, ServiceError> {
        let aggregated = self.aggregate(lines)?;

        let requests = aggregated
            .iter()
            .map(|req| {
                let mut context = MovementContext::by(actor_id)
                    .with_order(order_id)
                    .with_notes(format!("order {order_id}"));
                if let [menu_item_id] = req.menu_items.as_slice() {
                    context = context.with_menu_item(*menu_item_id);
                }
                MovementRequest::new(req.ingredient_id, MovementType::Usage, -req.required, context)
            })
            .collect();

        let movements = self
            .ledger
            .apply_batch(requests, Some(consume_key(order_id)))?;
        info!(%order_id, ingredients = movements.len(), "order consumption committed");

        Ok(self.receipt(order_id, movements))
    }

    /// Put back exactly what an order's usage rows took out (order cancellation).
    ///
    /// Quantities come from the ledger, never from the current recipe.
    pub fn reverse_consumption(
        &self,
        order_id: OrderId,
        actor_id: UserId,
    ) -> Result<ConsumptionReceipt, ServiceError> {
        let usage: Vec<_> = self
            .store
            .load_order_transactions(order_id)?
            .into_iter()
            .filter(|tx| tx.movement_type == MovementType::Usage)
            .collect();
        if usage.is_empty() {
            return Err(ServiceError::not_found("order consumption", order_id));
        }

        let requests = usage
            .iter()
            .map(|tx| {
                let mut context = MovementContext::by(actor_id)
                    .with_order(order_id)
                    .with_notes(format!("reversal of order {order_id}"));
                if let Some(menu_item_id) = tx.menu_item_id {
                    context = context.with_menu_item(menu_item_id);
                }
                MovementRequest::new(tx.ingredient_id, MovementType::Return, -tx.quantity, context)
            })
            .collect();

        let movements = self
            .ledger
            .apply_batch(requests, Some(reverse_key(order_id)))?;
        info!(%order_id, ingredients = movements.len(), "order consumption reversed");

        Ok(self.receipt(order_id, movements))
    }

    fn aggregate(&self, lines: &[OrderLine]) -> Result<Vec<AggregatedRequirement>, ServiceError> {
        validate_order_lines(lines)?;

        let mut seen = HashSet::new();
        let menu_ids: Vec<MenuItemId> = lines
            .iter()
            .map(|line| line.menu_item_id)
            .filter(|id| seen.insert(*id))
            .collect();
        for id in &menu_ids {
            if self.store.load_menu_item(*id)?.is_none() {
                return Err(ServiceError::not_found("menu item", id));
            }
        }

        let recipes = self.store.load_recipes(&menu_ids)?;
        Ok(aggregate_requirements(lines, &recipes)?)
    }

    fn receipt(&self, order_id: OrderId, movements: Vec<MovementOutcome>) -> ConsumptionReceipt {
        let touched: Vec<IngredientId> = movements
            .iter()
            .map(|m| m.transaction.ingredient_id)
            .collect();
        let availability_changes = match self.cascade.recompute_for_ingredients(&touched) {
            Ok(changes) => changes,
            Err(err) => {
                warn!(%order_id, error = %err, "availability cascade after consumption failed");
                Vec::new()
            }
        };
        ConsumptionReceipt {
            order_id,
            movements,
            availability_changes,
        }
    }
}
