//! Service-level error model.

use rust_decimal::Decimal;
use thiserror::Error;

use larder_core::DomainError;

use crate::store::StoreError;

/// Error returned by every service in this crate.
///
/// Any variant means the operation aborted with zero persisted side effects.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Rejected before any write (bad input, inactive ingredient, unit mismatch...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced ingredient, menu item, recipe or order does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A movement would have driven stock negative.
    #[error("insufficient stock for {name} ({ingredient_id}): required {required} {unit}, available {available} {unit}")]
    InsufficientStock {
        ingredient_id: String,
        name: String,
        unit: String,
        required: Decimal,
        available: Decimal,
    },

    /// Optimistic concurrency kept failing after the bounded number of attempts.
    #[error("concurrency conflict persisted after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },

    /// The request conflicts with committed state (e.g. an order consumed twice).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// `required - available` for insufficient stock, `None` otherwise.
    pub fn shortfall(&self) -> Option<Decimal> {
        match self {
            Self::InsufficientStock {
                required, available, ..
            } => Some(*required - *available),
            _ => None,
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::NotFound { entity, id } => Self::NotFound { entity, id },
            DomainError::InsufficientStock {
                ingredient_id,
                name,
                unit,
                required,
                available,
            } => Self::InsufficientStock {
                ingredient_id,
                name,
                unit,
                required,
                available,
            },
            DomainError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Duplicate(msg) => Self::Conflict(msg),
            StoreError::Concurrency(_) => Self::ConcurrencyConflict { attempts: 1 },
            StoreError::Backend(_) => Self::Store(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_keeps_quantities() {
        let err: ServiceError = DomainError::InsufficientStock {
            ingredient_id: "x".to_string(),
            name: "Flour".to_string(),
            unit: "kg".to_string(),
            required: Decimal::new(20, 1),
            available: Decimal::new(15, 1),
        }
        .into();

        assert_eq!(err.shortfall(), Some(Decimal::new(5, 1)));
        assert_eq!(
            err.to_string(),
            "insufficient stock for Flour (x): required 2.0 kg, available 1.5 kg"
        );
    }

    #[test]
    fn store_errors_map_to_service_kinds() {
        assert!(matches!(
            ServiceError::from(StoreError::Duplicate("batch consume:1".to_string())),
            ServiceError::Conflict(_)
        ));
        assert!(matches!(
            ServiceError::from(StoreError::NotFound {
                entity: "menu item",
                id: "m".to_string()
            }),
            ServiceError::NotFound {
                entity: "menu item",
                ..
            }
        ));
        assert!(matches!(
            ServiceError::from(StoreError::Backend("down".to_string())),
            ServiceError::Store(_)
        ));
    }
}
