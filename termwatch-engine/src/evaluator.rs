//! Rule Evaluator: (update, applicable terms) → violation decisions.
//!
//! Pure, deterministic and side-effect free. The decision timestamp and the
//! out-of-order flag come in through [`EvaluationContext`] so the same
//! inputs always produce the same output.
//!
//! # Guarantees
//!
//! - One decision per firing term, in term-id order
//! - No deduplication across terms (two terms, two decisions)
//! - Terms that are not Active or not yet effective never fire, even if a
//!   caller passes them in
//! - A term with a missing field is skipped, a defective rule is reported;
//!   neither stops the remaining terms

use chrono::{DateTime, Utc};

use termwatch_domain::{
    DedupKey, MarketDataUpdate, ScopeKey, Term, TermId, ViolationDecision,
};

use crate::error::EngineError;
use crate::rules::{self, RuleCheck, SkipReason};

// =============================================================================
// Evaluation Types
// =============================================================================

/// Inputs to an evaluation that are not part of the update itself.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext {
    /// Timestamp stamped on every decision
    pub decided_at: DateTime<Utc>,
    /// The update was released out of its key's sequence order
    pub out_of_order: bool,
}

impl EvaluationContext {
    /// In-order evaluation decided at `decided_at`.
    pub fn at(decided_at: DateTime<Utc>) -> Self {
        Self { decided_at, out_of_order: false }
    }

    /// Mark the evaluation as out of order.
    pub fn out_of_order(mut self, out_of_order: bool) -> Self {
        self.out_of_order = out_of_order;
        self
    }
}

/// A term that could not be evaluated on an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTerm {
    /// Term that was skipped
    pub term_id: TermId,
    /// Version that was skipped
    pub term_version: u64,
    /// Why
    pub reason: SkipReason,
}

/// A defective term+update pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDefect {
    /// Term whose rule is defective
    pub term_id: TermId,
    /// Version whose rule is defective
    pub term_version: u64,
    /// The defect
    pub error: EngineError,
}

/// Result of evaluating one update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// Firing terms, ordered by term id
    pub decisions: Vec<ViolationDecision>,
    /// Terms skipped for lack of a usable field
    pub skipped: Vec<SkippedTerm>,
    /// Terms whose rule is defective
    pub defects: Vec<RuleDefect>,
    /// Terms that were checked (fired, clear, skipped or defective)
    pub considered: usize,
}

impl Evaluation {
    /// Every applicable term was skipped for missing or unusable fields.
    pub fn all_skipped(&self) -> bool {
        self.considered > 0 && self.skipped.len() == self.considered
    }
}

// =============================================================================
// Evaluator
// =============================================================================

/// Evaluate `update` against `terms`.
///
/// `terms` is normally a registry lookup, already filtered and ordered,
/// but the applicability filter and ordering are re-applied here.
pub fn evaluate<'a, I>(update: &MarketDataUpdate, terms: I, ctx: EvaluationContext) -> Evaluation
where
    I: IntoIterator<Item = &'a Term>,
{
    let mut applicable: Vec<&Term> = terms
        .into_iter()
        .filter(|term| term.applies_at(update.source_timestamp))
        .collect();
    applicable.sort_by(|a, b| a.id.cmp(&b.id));
    applicable.dedup_by(|a, b| a.id == b.id);

    let mut evaluation = Evaluation { considered: applicable.len(), ..Evaluation::default() };

    for term in applicable {
        match rules::check(&term.rule, update) {
            Ok(RuleCheck::Fired(observed)) => {
                evaluation.decisions.push(decide(term, update, observed, &ctx));
            },
            Ok(RuleCheck::Clear) => {},
            Ok(RuleCheck::Skipped(reason)) => {
                evaluation.skipped.push(SkippedTerm {
                    term_id: term.id.clone(),
                    term_version: term.version,
                    reason,
                });
            },
            Err(error) => {
                evaluation.defects.push(RuleDefect {
                    term_id: term.id.clone(),
                    term_version: term.version,
                    error,
                });
            },
        }
    }

    evaluation
}

fn decide(
    term: &Term,
    update: &MarketDataUpdate,
    observed: termwatch_domain::FieldValue,
    ctx: &EvaluationContext,
) -> ViolationDecision {
    ViolationDecision {
        term_id: term.id.clone(),
        term_version: term.version,
        scope: matched_scope(term, update),
        event: update.event_ref(),
        observed,
        severity: term.severity,
        decided_at: ctx.decided_at,
        out_of_order: ctx.out_of_order,
        dedup_key: DedupKey::compute(&term.id, term.version, &update.instrument, update.sequence),
    }
}

fn matched_scope(term: &Term, update: &MarketDataUpdate) -> ScopeKey {
    update
        .scope_keys()
        .into_iter()
        .find(|key| *key == term.scope)
        .unwrap_or_else(|| term.scope.clone())
}

// =============================================================================
// Tests
// =============================================================================
