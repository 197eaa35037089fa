//! Termwatch Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes an update plus applicable terms → returns violation decisions.
//!
//! # Example
//!
//! ```rust,ignore
//! use termwatch_engine::{evaluate, EvaluationContext};
//!
//! let terms = registry.active_terms(&scope);
//! let evaluation = evaluate(&update, terms.iter().map(|t| t.as_ref()), EvaluationContext::at(Utc::now()));
//! for decision in evaluation.decisions {
//!     publisher.publish(decision).await;
//! }
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod evaluator;
pub mod rules;

pub use error::{EngineError, EngineResult};
pub use evaluator::{evaluate, Evaluation, EvaluationContext, RuleDefect, SkippedTerm};
pub use rules::{RuleCheck, SkipReason, MAX_PRECISION};
