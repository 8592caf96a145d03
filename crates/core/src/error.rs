//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A movement would drive an ingredient's stock below zero.
    #[error("insufficient stock for {name} ({ingredient_id}): required {required} {unit}, available {available} {unit}")]
    InsufficientStock {
        ingredient_id: String,
        name: String,
        unit: String,
        required: Decimal,
        available: Decimal,
    },

    /// The request conflicts with existing state (e.g. an order consumed twice).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// A quantity computation left the representable decimal range.
    pub fn quantity_out_of_range() -> Self {
        Self::Validation("quantity out of range".to_string())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Amount missing for an `InsufficientStock` error, `None` for other kinds.
    pub fn shortfall(&self) -> Option<Decimal> {
        match self {
            Self::InsufficientStock {
                required, available, ..
            } => Some(*required - *available),
            _ => None,
        }
    }
}
