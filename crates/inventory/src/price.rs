//! Ingredient cost history.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use larder_core::{IngredientId, PriceRecordId, UserId};

/// A missing price compares as zero.
pub fn normalize_price(price: Option<Decimal>) -> Decimal {
    price.unwrap_or(Decimal::ZERO)
}

/// Old/new pair of a real price change (normalized values).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChange {
    pub old_price: Decimal,
    pub new_price: Decimal,
}

/// `None` when the normalized prices are equal (including `None` vs `0`).
pub fn detect_price_change(old: Option<Decimal>, new: Option<Decimal>) -> Option<PriceChange> {
    let (old_price, new_price) = (normalize_price(old), normalize_price(new));
    (old_price != new_price).then_some(PriceChange {
        old_price,
        new_price,
    })
}

/// Append-only record of one cost change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHistoryRecord {
    pub id: PriceRecordId,
    pub ingredient_id: IngredientId,
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub change_date: DateTime<Utc>,
    pub change_reason: Option<String>,
    pub changed_by: UserId,
}

impl PriceHistoryRecord {
    pub fn new(
        ingredient_id: IngredientId,
        change: PriceChange,
        change_reason: Option<String>,
        changed_by: UserId,
        change_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PriceRecordId::new(),
            ingredient_id,
            old_price: change.old_price,
            new_price: change.new_price,
            change_date,
            change_reason,
            changed_by,
        }
    }
}

/// Notification payload: an ingredient's cost changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChanged {
    pub ingredient_id: IngredientId,
    pub name: String,
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub changed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl PriceChanged {
    pub fn from_record(record: &PriceHistoryRecord, name: impl Into<String>) -> Self {
        Self {
            ingredient_id: record.ingredient_id,
            name: name.into(),
            old_price: record.old_price,
            new_price: record.new_price,
            changed_by: record.changed_by,
            occurred_at: record.change_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_price_is_treated_as_zero() {
        assert_eq!(detect_price_change(None, Some(Decimal::ZERO)), None);
        assert_eq!(detect_price_change(Some(Decimal::ZERO), None), None);
        assert_eq!(
            detect_price_change(None, Some(Decimal::from(3))),
            Some(PriceChange {
                old_price: Decimal::ZERO,
                new_price: Decimal::from(3),
            })
        );
    }

    #[test]
    fn equal_values_with_different_scale_are_no_change() {
        assert_eq!(
            detect_price_change(Some(Decimal::new(1200, 0)), Some(Decimal::new(120000, 2))),
            None
        );
    }

    #[test]
    fn change_is_reported_with_both_sides() {
        let change = detect_price_change(Some(Decimal::from(1000)), Some(Decimal::from(1200))).unwrap();
        assert_eq!(change.old_price, Decimal::from(1000));
        assert_eq!(change.new_price, Decimal::from(1200));
    }
}
