//! Engine error types.

use rust_decimal::Decimal;
use thiserror::Error;

/// Defects in a rule definition detected while evaluating it.
///
/// A defect only ever disqualifies the term it belongs to; other terms
/// on the same update still evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Declared precision cannot be represented by `Decimal`
    #[error("Precision {precision} exceeds the supported maximum of {max}")]
    InvalidPrecision {
        /// Declared precision
        precision: u32,
        /// Largest supported precision
        max: u32,
    },

    /// Range rule whose lower bound exceeds its upper bound
    #[error("Range is inverted: min {min} > max {max}")]
    InvertedRange {
        /// Declared lower bound
        min: Decimal,
        /// Declared upper bound
        max: Decimal,
    },

    /// Membership rule with no listed values
    #[error("Membership set for field '{field}' is empty")]
    EmptyMembershipSet {
        /// Field the rule reads
        field: String,
    },
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
