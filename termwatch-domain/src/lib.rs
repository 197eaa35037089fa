//! Termwatch Domain Layer
//!
//! Pure domain types with zero I/O dependencies: terms, market data
//! updates, violation decisions and alerts.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod market_data;
pub mod term;
pub mod value_objects;
pub mod violation;

// Re-export commonly used types
pub use market_data::{EventRef, MarketDataUpdate};
pub use term::{ComparisonOp, MembershipMode, RuleSpec, Term, TermChangeEvent, TermStatus};
pub use value_objects::{
    DomainError, FieldValue, InstrumentKey, ScopeKey, ScopeKind, Severity, TermId,
};
pub use violation::{DedupKey, ViolationAlert, ViolationDecision};
