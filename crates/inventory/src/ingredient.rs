use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::{Aggregate, AggregateRoot, DomainError, IngredientId, UserId};

use crate::movement::{ApplyMovement, StockTransaction};
use crate::price::{PriceHistoryRecord, detect_price_change};

/// Admin-editable part of an ingredient. Stock is deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientDetails {
    pub name: String,
    /// Fixed unit of measure for every quantity of this ingredient (e.g. "kg").
    pub unit: String,
    pub min_stock_level: Decimal,
    pub cost_per_unit: Option<Decimal>,
    pub is_active: bool,
}

impl IngredientDetails {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if self.unit.trim().is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }
        if self.min_stock_level < Decimal::ZERO {
            return Err(DomainError::validation("min_stock_level cannot be negative"));
        }
        if self.cost_per_unit.is_some_and(|c| c < Decimal::ZERO) {
            return Err(DomainError::validation("cost_per_unit cannot be negative"));
        }
        Ok(())
    }
}

/// Admin request to create an ingredient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIngredient {
    pub name: String,
    pub unit: String,
    pub min_stock_level: Decimal,
    pub cost_per_unit: Option<Decimal>,
    /// Booked through the ledger as an `adjustment_in` right after creation.
    pub opening_stock: Decimal,
}

/// Admin request to edit an ingredient. `None` leaves a field untouched.
///
/// The unit is fixed at creation; changing it would silently reinterpret every
/// ledger row and recipe line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientUpdate {
    pub name: Option<String>,
    pub min_stock_level: Option<Decimal>,
    /// `Some(None)` clears the price.
    pub cost_per_unit: Option<Option<Decimal>>,
    pub change_reason: Option<String>,
}

/// Outcome of planning an [`IngredientUpdate`]: the new details plus the price
/// history row to append alongside them, if the price really changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub details: IngredientDetails,
    pub price_record: Option<PriceHistoryRecord>,
}

/// Aggregate root: Ingredient.
///
/// `current_stock` is a cache over the ingredient's ledger rows. It only moves
/// through [`Aggregate::apply`] with a committed [`StockTransaction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    id: IngredientId,
    details: IngredientDetails,
    current_stock: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Ingredient {
    /// Create a new ingredient with zero stock.
    pub fn create(
        id: IngredientId,
        new: &NewIngredient,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let details = IngredientDetails {
            name: new.name.trim().to_string(),
            unit: new.unit.trim().to_string(),
            min_stock_level: new.min_stock_level,
            cost_per_unit: new.cost_per_unit,
            is_active: true,
        };
        details.validate()?;
        if new.opening_stock < Decimal::ZERO {
            return Err(DomainError::validation("opening_stock cannot be negative"));
        }
        Ok(Self {
            id,
            details,
            current_stock: Decimal::ZERO,
            created_at: occurred_at,
            updated_at: occurred_at,
        })
    }

    /// Rehydrate from persisted columns.
    pub fn restore(
        id: IngredientId,
        details: IngredientDetails,
        current_stock: Decimal,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            details,
            current_stock,
            created_at,
            updated_at,
        }
    }

    pub fn id_typed(&self) -> IngredientId {
        self.id
    }

    pub fn details(&self) -> &IngredientDetails {
        &self.details
    }

    pub fn name(&self) -> &str {
        &self.details.name
    }

    pub fn unit(&self) -> &str {
        &self.details.unit
    }

    pub fn current_stock(&self) -> Decimal {
        self.current_stock
    }

    pub fn min_stock_level(&self) -> Decimal {
        self.details.min_stock_level
    }

    pub fn cost_per_unit(&self) -> Option<Decimal> {
        self.details.cost_per_unit
    }

    pub fn is_active(&self) -> bool {
        self.details.is_active
    }

    pub fn is_below_minimum(&self) -> bool {
        self.current_stock < self.details.min_stock_level
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Replace the admin-editable details (stock untouched).
    pub fn with_details(mut self, details: IngredientDetails, at: DateTime<Utc>) -> Self {
        self.details = details;
        self.updated_at = at;
        self
    }

    /// Plan an admin edit. Price history is only produced when the normalized
    /// price actually changes.
    pub fn plan_update(
        &self,
        update: &IngredientUpdate,
        changed_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<UpdatePlan, DomainError> {
        let mut details = self.details.clone();
        if let Some(name) = &update.name {
            details.name = name.trim().to_string();
        }
        if let Some(level) = update.min_stock_level {
            details.min_stock_level = level;
        }
        if let Some(price) = update.cost_per_unit {
            details.cost_per_unit = price;
        }
        details.validate()?;

        let price_record = update.cost_per_unit.and_then(|new_price| {
            detect_price_change(self.details.cost_per_unit, new_price).map(|change| {
                PriceHistoryRecord::new(
                    self.id,
                    change,
                    update.change_reason.clone(),
                    changed_by,
                    at,
                )
            })
        });

        Ok(UpdatePlan {
            details,
            price_record,
        })
    }

    /// Rebuild the stock cache from scratch by replaying ledger rows in order.
    pub fn replay<'a>(&self, history: impl IntoIterator<Item = &'a StockTransaction>) -> Self {
        let mut rebuilt = Self {
            current_stock: Decimal::ZERO,
            updated_at: self.created_at,
            ..self.clone()
        };
        for tx in history {
            rebuilt.apply(tx);
        }
        rebuilt.updated_at = self.updated_at;
        rebuilt
    }
}

/// Check that ledger rows chain: each row starts where the previous one ended and
/// its snapshot agrees with its delta. Returns the index of the first broken row.
pub fn find_chain_break(history: &[StockTransaction]) -> Option<usize> {
    let mut expected_previous = Decimal::ZERO;
    for (idx, tx) in history.iter().enumerate() {
        if tx.previous_quantity != expected_previous
            || tx.previous_quantity.checked_add(tx.quantity) != Some(tx.new_quantity)
        {
            return Some(idx);
        }
        expected_previous = tx.new_quantity;
    }
    None
}

impl AggregateRoot for Ingredient {
    type Id = IngredientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Aggregate for Ingredient {
    type Command = ApplyMovement;
    type Event = StockTransaction;
    type Error = DomainError;

    /// Replay of a corrupt ledger saturates instead of panicking; `handle` never
    /// produces a row that overflows.
    fn apply(&mut self, event: &Self::Event) {
        self.current_stock = self.current_stock.saturating_add(event.quantity);
        self.updated_at = event.occurred_at;
    }

    fn handle(&self, cmd: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if cmd.ingredient_id != self.id {
            return Err(DomainError::validation("ingredient_id mismatch"));
        }
        cmd.movement_type.check_delta(cmd.delta)?;
        if cmd.context.unit_price.is_some_and(|p| p < Decimal::ZERO) {
            return Err(DomainError::validation("unit_price cannot be negative"));
        }

        let previous_quantity = self.current_stock;
        let new_quantity = previous_quantity
            .checked_add(cmd.delta)
            .ok_or_else(DomainError::quantity_out_of_range)?;
        if new_quantity < Decimal::ZERO {
            return Err(DomainError::InsufficientStock {
                ingredient_id: self.id.to_string(),
                name: self.details.name.clone(),
                unit: self.details.unit.clone(),
                required: -cmd.delta,
                available: previous_quantity,
            });
        }

        Ok(vec![StockTransaction {
            id: cmd.transaction_id,
            ingredient_id: self.id,
            movement_type: cmd.movement_type,
            quantity: cmd.delta,
            previous_quantity,
            new_quantity,
            unit_price: cmd.context.unit_price,
            occurred_at: cmd.occurred_at,
            actor_id: cmd.context.actor_id,
            notes: cmd.context.notes.clone(),
            order_id: cmd.context.order_id,
            menu_item_id: cmd.context.menu_item_id,
        }])
    }
}
