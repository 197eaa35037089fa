//! Terms and their lifecycle.
//!
//! A term is a versioned business rule (rate cap, exposure limit, venue
//! whitelist, ...) owned by the external term service. The engine only ever
//! holds read-only projections built from [`TermChangeEvent`]s.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::value_objects::{DomainError, ScopeKey, Severity, TermId};

// =============================================================================
// Term Status
// =============================================================================

/// Lifecycle status of a term.
///
/// ```text
/// Draft ──publish──► Active ──► Suspended ──► Active
///                      │            │
///                      └────────────┴──────► Retired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermStatus {
    /// Created by the term service, not yet published
    Draft,
    /// Published; the only status evaluated against market data
    Active,
    /// Temporarily out of evaluation
    Suspended,
    /// Permanently out of evaluation
    Retired,
}

impl TermStatus {
    /// Whether the transition `self -> next` is allowed by the term service.
    pub fn can_transition_to(&self, next: TermStatus) -> bool {
        use TermStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Draft, Active) | (Draft, Retired) => true,
            (Active, Suspended) | (Active, Retired) => true,
            (Suspended, Active) | (Suspended, Retired) => true,
            _ => false,
        }
    }

    /// Status name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            TermStatus::Draft => "draft",
            TermStatus::Active => "active",
            TermStatus::Suspended => "suspended",
            TermStatus::Retired => "retired",
        }
    }
}

impl fmt::Display for TermStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Comparison operator declared by a threshold rule.
///
/// The rule fires when `value <op> limit` holds, so the operator alone
/// decides whether the boundary is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    /// `value > limit`
    #[serde(rename = ">", alias = "gt")]
    Gt,
    /// `value >= limit`
    #[serde(rename = ">=", alias = "ge")]
    Ge,
    /// `value < limit`
    #[serde(rename = "<", alias = "lt")]
    Lt,
    /// `value <= limit`
    #[serde(rename = "<=", alias = "le")]
    Le,
}

impl ComparisonOp {
    /// Apply the operator.
    pub fn holds(&self, value: Decimal, limit: Decimal) -> bool {
        match self {
            ComparisonOp::Gt => value > limit,
            ComparisonOp::Ge => value >= limit,
            ComparisonOp::Lt => value < limit,
            ComparisonOp::Le => value <= limit,
        }
    }

    /// Operator symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Whether a membership set lists permitted or forbidden values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipMode {
    /// Fires when the value is NOT in the set
    Allow,
    /// Fires when the value IS in the set
    Deny,
}

/// Rule carried by a term. Closed set of variants, one pure check each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleSpec {
    /// Single-limit breach (`rate > 5.0`)
    Threshold {
        /// Market data field the rule reads
        field: String,
        /// Breach operator
        operator: ComparisonOp,
        /// Limit value
        limit: Decimal,
        /// Decimal places both sides are rounded to before comparing
        precision: u32,
    },

    /// Value must stay inside a band
    Range {
        /// Market data field the rule reads
        field: String,
        /// Lower bound
        min: Decimal,
        /// Upper bound
        max: Decimal,
        /// Whether the bounds themselves are permitted
        inclusive: bool,
        /// Decimal places both sides are rounded to before comparing
        precision: u32,
    },

    /// Value must (or must not) be one of a set
    SetMembership {
        /// Market data field the rule reads
        field: String,
        /// Listed values
        values: BTreeSet<String>,
        /// Allow-list or deny-list semantics
        mode: MembershipMode,
    },
}

impl RuleSpec {
    /// Field the rule reads.
    pub fn field(&self) -> &str {
        match self {
            RuleSpec::Threshold { field, .. }
            | RuleSpec::Range { field, .. }
            | RuleSpec::SetMembership { field, .. } => field,
        }
    }

    /// Short rule kind for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RuleSpec::Threshold { .. } => "threshold",
            RuleSpec::Range { .. } => "range",
            RuleSpec::SetMembership { .. } => "set_membership",
        }
    }
}

// =============================================================================
// Term
// =============================================================================

/// A versioned business rule evaluated against market data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    /// Stable identifier
    pub id: TermId,
    /// Monotonic per identifier
    pub version: u64,
    /// Predicate and thresholds
    pub rule: RuleSpec,
    /// Which events the term applies to
    pub scope: ScopeKey,
    /// Lifecycle status
    pub status: TermStatus,
    /// Earliest event timestamp the term applies to
    pub effective_from: DateTime<Utc>,
    /// Severity of violations
    #[serde(default)]
    pub severity: Severity,
}

impl Term {
    /// Create a new Active term at version 1.
    pub fn new(id: TermId, scope: ScopeKey, rule: RuleSpec, effective_from: DateTime<Utc>) -> Self {
        Self {
            id,
            version: 1,
            rule,
            scope,
            status: TermStatus::Active,
            effective_from,
            severity: Severity::default(),
        }
    }

    /// Builder-style severity override.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Whether the term is evaluated for an event stamped `at`.
    ///
    /// Only Active terms whose `effective_from` is not after the event apply.
    pub fn applies_at(&self, at: DateTime<Utc>) -> bool {
        self.status == TermStatus::Active && self.effective_from <= at
    }

    /// Produce the next version of this term with a new status.
    pub fn transition(&self, next: TermStatus) -> Result<Self, DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition(format!(
                "term {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        let mut term = self.clone();
        term.status = next;
        term.version += 1;
        Ok(term)
    }
}

// =============================================================================
// Term Change Event
// =============================================================================

/// Change notification from the term service.
///
/// Carries the full new state of a term; the registry replaces whatever
/// version it held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermChangeEvent {
    /// Term being changed
    pub term_id: TermId,
    /// New version (must exceed the held version)
    pub version: u64,
    /// New status
    pub status: TermStatus,
    /// New scope
    pub scope: ScopeKey,
    /// New rule
    pub rule: RuleSpec,
    /// New effective-from timestamp
    pub effective_from: DateTime<Utc>,
    /// New severity
    #[serde(default)]
    pub severity: Severity,
}

impl TermChangeEvent {
    /// Materialize the term this change describes.
    pub fn into_term(self) -> Term {
        Term {
            id: self.term_id,
            version: self.version,
            rule: self.rule,
            scope: self.scope,
            status: self.status,
            effective_from: self.effective_from,
            severity: self.severity,
        }
    }
}

impl From<&Term> for TermChangeEvent {
    fn from(term: &Term) -> Self {
        Self {
            term_id: term.id.clone(),
            version: term.version,
            status: term.status,
            scope: term.scope.clone(),
            rule: term.rule.clone(),
            effective_from: term.effective_from,
            severity: term.severity,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn rate_cap() -> Term {
        Term::new(
            TermId::new("RATE_CAP_5PCT").unwrap(),
            ScopeKey::instrument("USD-SWAP"),
            RuleSpec::Threshold {
                field: "rate".to_string(),
                operator: ComparisonOp::Gt,
                limit: dec!(5.0),
                precision: 4,
            },
            Utc::now() - Duration::hours(1),
        )
    }

    #[test]
    fn test_comparison_ops() {
        assert!(ComparisonOp::Gt.holds(dec!(5.01), dec!(5.0)));
        assert!(!ComparisonOp::Gt.holds(dec!(5.0), dec!(5.0)));
        assert!(ComparisonOp::Ge.holds(dec!(5.0), dec!(5.0)));
        assert!(ComparisonOp::Lt.holds(dec!(4.99), dec!(5.0)));
        assert!(!ComparisonOp::Lt.holds(dec!(5.0), dec!(5.0)));
        assert!(ComparisonOp::Le.holds(dec!(5.0), dec!(5.0)));
    }

    #[test]
    fn test_applies_only_when_active_and_effective() {
        let term = rate_cap();
        let now = Utc::now();
        assert!(term.applies_at(now));
        assert!(!term.applies_at(term.effective_from - Duration::seconds(1)));
        assert!(term.applies_at(term.effective_from));

        let suspended = term.transition(TermStatus::Suspended).unwrap();
        assert!(!suspended.applies_at(now));
    }

    #[test]
    fn test_transition_bumps_version() {
        let term = rate_cap();
        let suspended = term.transition(TermStatus::Suspended).unwrap();
        assert_eq!(suspended.version, 2);
        assert_eq!(suspended.status, TermStatus::Suspended);
    }

    #[test]
    fn test_retired_is_terminal() {
        let retired = rate_cap().transition(TermStatus::Retired).unwrap();
        assert!(retired.transition(TermStatus::Active).is_err());
    }

    #[test]
    fn test_rule_spec_wire_format() {
        let json = r#"{"type":"threshold","field":"rate","operator":">","limit":"5.0","precision":2}"#;
        let rule: RuleSpec = serde_json::from_str(json).unwrap();
        assert_eq!(rule.field(), "rate");
        assert_eq!(rule.kind(), "threshold");
        match rule {
            RuleSpec::Threshold { operator, limit, .. } => {
                assert_eq!(operator, ComparisonOp::Gt);
                assert_eq!(limit, dec!(5.0));
            },
            other => panic!("Expected threshold rule, got {:?}", other),
        }
    }

    #[test]
    fn test_change_event_round_trips_term() {
        let term = rate_cap();
        let change = TermChangeEvent::from(&term);
        assert_eq!(change.into_term(), term);
    }
}
