//! Stock movements: the rows of the append-only ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::{DomainError, IngredientId, MenuItemId, OrderId, TransactionId, UserId};

/// Kind of stock movement. The kind fixes the sign of the delta.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Goods received from a supplier.
    Purchase,
    /// Consumed by an order.
    Usage,
    /// Manual correction upwards (stock count, opening balance).
    AdjustmentIn,
    /// Manual correction downwards.
    AdjustmentOut,
    /// Spoiled or discarded.
    Waste,
    /// Goods coming back into stock, e.g. a reversed order.
    Return,
}

impl MovementType {
    pub const ALL: [MovementType; 6] = [
        MovementType::Purchase,
        MovementType::Usage,
        MovementType::AdjustmentIn,
        MovementType::AdjustmentOut,
        MovementType::Waste,
        MovementType::Return,
    ];

    /// Inbound movements carry a positive delta, outbound ones a negative delta.
    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            MovementType::Purchase | MovementType::AdjustmentIn | MovementType::Return
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Purchase => "purchase",
            MovementType::Usage => "usage",
            MovementType::AdjustmentIn => "adjustment_in",
            MovementType::AdjustmentOut => "adjustment_out",
            MovementType::Waste => "waste",
            MovementType::Return => "return",
        }
    }

    /// Reject zero deltas and deltas whose sign contradicts the movement kind.
    pub fn check_delta(self, delta: Decimal) -> Result<(), DomainError> {
        if delta.is_zero() {
            return Err(DomainError::validation("movement delta cannot be zero"));
        }
        if self.is_inbound() != (delta > Decimal::ZERO) {
            let expected = if self.is_inbound() { "positive" } else { "negative" };
            return Err(DomainError::validation(format!(
                "{} movements require a {expected} delta, got {delta}",
                self.as_str()
            )));
        }
        Ok(())
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type: {s}")))
    }
}

/// Who moved stock and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementContext {
    pub actor_id: UserId,
    pub notes: Option<String>,
    pub order_id: Option<OrderId>,
    pub menu_item_id: Option<MenuItemId>,
    pub unit_price: Option<Decimal>,
}

impl MovementContext {
    pub fn by(actor_id: UserId) -> Self {
        Self {
            actor_id,
            notes: None,
            order_id: None,
            menu_item_id: None,
            unit_price: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_menu_item(mut self, menu_item_id: MenuItemId) -> Self {
        self.menu_item_id = Some(menu_item_id);
        self
    }

    pub fn with_unit_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

/// Command: apply one signed movement to an ingredient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyMovement {
    pub ingredient_id: IngredientId,
    pub transaction_id: TransactionId,
    pub movement_type: MovementType,
    pub delta: Decimal,
    pub context: MovementContext,
    pub occurred_at: DateTime<Utc>,
}

/// Ledger row: one committed movement with its before/after snapshot.
///
/// Rows are write-once. `new_quantity == previous_quantity + quantity` always holds,
/// so the stock at any instant can be read off the last row before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransaction {
    pub id: TransactionId,
    pub ingredient_id: IngredientId,
    pub movement_type: MovementType,
    /// Signed delta.
    pub quantity: Decimal,
    pub previous_quantity: Decimal,
    pub new_quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: UserId,
    pub notes: Option<String>,
    pub order_id: Option<OrderId>,
    pub menu_item_id: Option<MenuItemId>,
}

impl StockTransaction {
    pub fn is_decrease(&self) -> bool {
        self.quantity < Decimal::ZERO
    }
}
