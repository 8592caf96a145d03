//! Stock Ledger: the only legal path to changing an ingredient's cached stock.
//!
//! ## Movement pipeline
//!
//! ```text
//! MovementRequest[]
//!   ↓
//! 1. Validate each request and fold requests per ingredient
//!   ↓
//! 2. Load the current ingredient snapshots
//!   ↓
//! 3. Decide: Ingredient::handle(ApplyMovement) → StockTransaction (pure)
//!   ↓
//! 4. Commit all rows + cached stock writes in one store call, CAS on previous_quantity
//!   ↓   (CAS failed → back to 2, at most `max_attempts` times)
//! 5. Apply the rows locally and run the Alert Emitter
//! ```
//!
//! The cached `current_stock` and the ledger rows are always written together; a
//! rejected decision or a failed commit leaves both untouched. Replaying every row
//! through `Ingredient::apply` rebuilds the cache, and [`StockLedger::reconcile`] does
//! exactly that to detect and repair drift caused by out-of-band edits.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use larder_core::{Aggregate, DomainError, IngredientId, OrderId, TransactionId};
use larder_events::EventBus;
use larder_inventory::{
    ApplyMovement, Ingredient, MovementContext, MovementType, StockTransaction, find_chain_break,
};

use crate::alerts::AlertEmitter;
use crate::error::ServiceError;
use crate::notify::NotificationEnvelope;
use crate::store::{IngredientStore, StockBatch, StoreError};

/// Ledger tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Decide/commit attempts before a CAS conflict is surfaced.
    pub max_attempts: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// One signed movement requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub ingredient_id: IngredientId,
    pub movement_type: MovementType,
    pub delta: Decimal,
    pub context: MovementContext,
}

impl MovementRequest {
    pub fn new(
        ingredient_id: IngredientId,
        movement_type: MovementType,
        delta: Decimal,
        context: MovementContext,
    ) -> Self {
        Self {
            ingredient_id,
            movement_type,
            delta,
            context,
        }
    }
}

/// A committed movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementOutcome {
    pub previous_quantity: Decimal,
    pub new_quantity: Decimal,
    pub transaction: StockTransaction,
}

/// Result of replaying one ingredient's ledger against its cached stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub ingredient_id: IngredientId,
    pub cached: Decimal,
    pub replayed: Decimal,
    pub rows: usize,
    /// Index of the first row whose snapshot does not chain onto the previous row.
    pub chain_break: Option<usize>,
    pub repaired: bool,
}

impl ReconciliationReport {
    pub fn drift(&self) -> Decimal {
        self.cached.saturating_sub(self.replayed)
    }

    pub fn is_consistent(&self) -> bool {
        self.cached == self.replayed && self.chain_break.is_none()
    }
}

#[derive(Debug)]
pub struct StockLedger<S, B> {
    store: Arc<S>,
    alerts: AlertEmitter<B>,
    settings: LedgerSettings,
}

impl<S, B: Clone> Clone for StockLedger<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            alerts: self.alerts.clone(),
            settings: self.settings,
        }
    }
}

impl<S, B> StockLedger<S, B>
where
    S: IngredientStore,
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(store: Arc<S>, alerts: AlertEmitter<B>, settings: LedgerSettings) -> Self {
        Self {
            store,
            alerts,
            settings: LedgerSettings {
                max_attempts: settings.max_attempts.max(1),
            },
        }
    }

    /// Apply one movement. `delta` is signed and must agree with `movement_type`.
    pub fn apply_movement(
        &self,
        ingredient_id: IngredientId,
        delta: Decimal,
        movement_type: MovementType,
        context: MovementContext,
    ) -> Result<MovementOutcome, ServiceError> {
        let mut outcomes = self.apply_batch(
            vec![MovementRequest::new(ingredient_id, movement_type, delta, context)],
            None,
        )?;
        outcomes
            .pop()
            .ok_or_else(|| ServiceError::Validation("movement produced no ledger row".to_string()))
    }

    /// Insert a new ingredient, booking `opening_stock` (if positive) as an
    /// `adjustment_in` row in the same store call. Either both land or neither does.
    pub fn open_ingredient(
        &self,
        mut ingredient: Ingredient,
        opening_stock: Decimal,
        context: MovementContext,
    ) -> Result<Ingredient, ServiceError> {
        let opening = if opening_stock > Decimal::ZERO {
            let rows = ingredient.handle(&ApplyMovement {
                ingredient_id: ingredient.id_typed(),
                transaction_id: TransactionId::new(),
                movement_type: MovementType::AdjustmentIn,
                delta: opening_stock,
                context,
                occurred_at: ingredient.created_at(),
            })?;
            for row in &rows {
                ingredient.apply(row);
            }
            rows.into_iter().next()
        } else {
            None
        };

        self.store.insert_ingredient(&ingredient, opening.as_ref())?;
        if let Some(row) = &opening {
            info!(
                ingredient_id = %row.ingredient_id,
                movement_type = %row.movement_type,
                new = %row.new_quantity,
                "opening stock committed"
            );
        }
        Ok(ingredient)
    }

    /// Apply several movements as one all-or-nothing commit.
    ///
    /// Requests on the same ingredient are folded into one row (they must share a
    /// movement type). Outcomes follow the first appearance of each ingredient.
    pub fn apply_batch(
        &self,
        requests: Vec<MovementRequest>,
        idempotency_key: Option<String>,
    ) -> Result<Vec<MovementOutcome>, ServiceError> {
        let folded = fold_requests(requests)?;
        let ids: Vec<IngredientId> = folded.iter().map(|r| r.ingredient_id).collect();

        for attempt in 1..=self.settings.max_attempts {
            let mut snapshots: HashMap<IngredientId, Ingredient> = self
                .store
                .load_ingredients(&ids)?
                .into_iter()
                .map(|ingredient| (ingredient.id_typed(), ingredient))
                .collect();

            let occurred_at = Utc::now();
            let mut transactions = Vec::with_capacity(folded.len());
            for request in &folded {
                let ingredient = snapshots
                    .get(&request.ingredient_id)
                    .ok_or_else(|| ServiceError::not_found("ingredient", request.ingredient_id))?;
                transactions.extend(ingredient.handle(&ApplyMovement {
                    ingredient_id: request.ingredient_id,
                    transaction_id: TransactionId::new(),
                    movement_type: request.movement_type,
                    delta: request.delta,
                    context: request.context.clone(),
                    occurred_at,
                })?);
            }

            let batch = StockBatch {
                idempotency_key: idempotency_key.clone(),
                transactions,
            };
            match self.store.commit_stock(&batch) {
                Ok(()) => return Ok(self.after_commit(&mut snapshots, batch.transactions)),
                Err(StoreError::Concurrency(reason)) => {
                    debug!(attempt, %reason, "stock changed between read and commit; retrying");
                }
                Err(StoreError::Duplicate(_)) => {
                    return Err(ServiceError::Conflict(format!(
                        "batch {} was already committed",
                        idempotency_key.as_deref().unwrap_or("<unkeyed>")
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(
            attempts = self.settings.max_attempts,
            ingredients = ids.len(),
            "giving up on stock commit after repeated conflicts"
        );
        Err(ServiceError::ConcurrencyConflict {
            attempts: self.settings.max_attempts,
        })
    }

    fn after_commit(
        &self,
        snapshots: &mut HashMap<IngredientId, Ingredient>,
        transactions: Vec<StockTransaction>,
    ) -> Vec<MovementOutcome> {
        let mut outcomes = Vec::with_capacity(transactions.len());
        for tx in transactions {
            info!(
                ingredient_id = %tx.ingredient_id,
                movement_type = %tx.movement_type,
                delta = %tx.quantity,
                previous = %tx.previous_quantity,
                new = %tx.new_quantity,
                order_id = ?tx.order_id,
                "stock movement committed"
            );
            if let Some(ingredient) = snapshots.get_mut(&tx.ingredient_id) {
                ingredient.apply(&tx);
                if tx.is_decrease() {
                    self.alerts.on_committed(ingredient, &tx);
                }
            }
            outcomes.push(MovementOutcome {
                previous_quantity: tx.previous_quantity,
                new_quantity: tx.new_quantity,
                transaction: tx,
            });
        }
        outcomes
    }

    /// Replay an ingredient's ledger, report drift and repair the cached stock.
    pub fn reconcile(&self, ingredient_id: IngredientId) -> Result<ReconciliationReport, ServiceError> {
        for _ in 0..self.settings.max_attempts {
            let (ingredient, history) = self
                .store
                .load_with_history(ingredient_id)?
                .ok_or_else(|| ServiceError::not_found("ingredient", ingredient_id))?;

            let mut report = ReconciliationReport {
                ingredient_id,
                cached: ingredient.current_stock(),
                replayed: ingredient.replay(&history).current_stock(),
                rows: history.len(),
                chain_break: find_chain_break(&history),
                repaired: false,
            };

            if let Some(index) = report.chain_break {
                warn!(%ingredient_id, row = index, "ledger snapshots do not chain");
            }
            if report.cached == report.replayed {
                return Ok(report);
            }

            warn!(
                %ingredient_id,
                cached = %report.cached,
                replayed = %report.replayed,
                "cached stock drifted from ledger"
            );
            if report.replayed < Decimal::ZERO {
                warn!(%ingredient_id, "replayed stock is negative; cached value left for manual repair");
                return Ok(report);
            }

            match self
                .store
                .repair_stock(ingredient_id, report.cached, report.replayed)
            {
                Ok(()) => {
                    info!(%ingredient_id, stock = %report.replayed, "cached stock repaired from ledger");
                    report.repaired = true;
                    return Ok(report);
                }
                Err(StoreError::Concurrency(reason)) => {
                    debug!(%ingredient_id, %reason, "stock moved during reconciliation; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ServiceError::ConcurrencyConflict {
            attempts: self.settings.max_attempts,
        })
    }

    /// Reconcile every ingredient. Returns one report per ingredient.
    pub fn reconcile_all(&self) -> Result<Vec<ReconciliationReport>, ServiceError> {
        let ingredients = self.store.list_ingredients()?;
        let mut reports = Vec::with_capacity(ingredients.len());
        for ingredient in &ingredients {
            reports.push(self.reconcile(ingredient.id_typed())?);
        }
        let drifted = reports.iter().filter(|r| !r.is_consistent()).count();
        info!(checked = reports.len(), drifted, "ledger reconciliation finished");
        Ok(reports)
    }

    /// Ledger rows of one ingredient in commit order.
    pub fn history(&self, ingredient_id: IngredientId) -> Result<Vec<StockTransaction>, ServiceError> {
        self.store
            .load_with_history(ingredient_id)?
            .map(|(_, history)| history)
            .ok_or_else(|| ServiceError::not_found("ingredient", ingredient_id))
    }

    /// Rows correlated with an order (consumption and reversal).
    pub fn order_movements(&self, order_id: OrderId) -> Result<Vec<StockTransaction>, ServiceError> {
        Ok(self.store.load_order_transactions(order_id)?)
    }

    /// Stock at an instant, read off the row snapshots without replaying deltas.
    pub fn stock_at(
        &self,
        ingredient_id: IngredientId,
        at: DateTime<Utc>,
    ) -> Result<Decimal, ServiceError> {
        Ok(self
            .history(ingredient_id)?
            .iter()
            .rev()
            .find(|tx| tx.occurred_at <= at)
            .map(|tx| tx.new_quantity)
            .unwrap_or(Decimal::ZERO))
    }
}

/// Validate requests and merge those touching the same ingredient.
fn fold_requests(requests: Vec<MovementRequest>) -> Result<Vec<MovementRequest>, ServiceError> {
    if requests.is_empty() {
        return Err(ServiceError::Validation(
            "a stock batch needs at least one movement".to_string(),
        ));
    }

    let mut folded: Vec<MovementRequest> = Vec::with_capacity(requests.len());
    let mut positions: HashMap<IngredientId, usize> = HashMap::new();
    for request in requests {
        request.movement_type.check_delta(request.delta)?;
        match positions.get(&request.ingredient_id) {
            Some(&idx) => {
                let existing = &mut folded[idx];
                if existing.movement_type != request.movement_type {
                    return Err(ServiceError::Validation(format!(
                        "ingredient {} has both {} and {} movements in one batch",
                        request.ingredient_id, existing.movement_type, request.movement_type
                    )));
                }
                existing.delta = existing
                    .delta
                    .checked_add(request.delta)
                    .ok_or_else(DomainError::quantity_out_of_range)?;
                if existing.context.menu_item_id != request.context.menu_item_id {
                    existing.context.menu_item_id = None;
                }
            }
            None => {
                positions.insert(request.ingredient_id, folded.len());
                folded.push(request);
            }
        }
    }
    Ok(folded)
}
