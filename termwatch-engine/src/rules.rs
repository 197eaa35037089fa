//! Per-variant rule checks.
//!
//! One pure function per [`RuleSpec`] variant. Each returns whether the
//! rule fired on an update, whether it had to be skipped because the
//! update lacks a usable field, or a defect in the rule itself.

use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeSet;

use termwatch_domain::{ComparisonOp, FieldValue, MarketDataUpdate, MembershipMode, RuleSpec};

use crate::error::{EngineError, EngineResult};

/// Largest scale `Decimal` can hold.
pub const MAX_PRECISION: u32 = 28;

/// Outcome of checking one rule against one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCheck {
    /// The rule is breached; carries the observed field value
    Fired(FieldValue),
    /// The rule holds
    Clear,
    /// The update does not carry a usable value for the rule's field
    Skipped(SkipReason),
}

/// Why a term could not be evaluated on an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Field absent from the update
    MissingField(String),
    /// Field present but not numeric where the rule compares numbers
    NotNumeric(String),
    /// Field present but `null` or structured where the rule compares text
    NoText(String),
}

impl SkipReason {
    /// Field the skip refers to.
    pub fn field(&self) -> &str {
        match self {
            SkipReason::MissingField(field)
            | SkipReason::NotNumeric(field)
            | SkipReason::NoText(field) => field,
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingField(field) => write!(f, "missing field '{}'", field),
            SkipReason::NotNumeric(field) => write!(f, "field '{}' is not numeric", field),
            SkipReason::NoText(field) => write!(f, "field '{}' has no text value", field),
        }
    }
}

/// Check `rule` against `update`.
pub fn check(rule: &RuleSpec, update: &MarketDataUpdate) -> EngineResult<RuleCheck> {
    match rule {
        RuleSpec::Threshold { field, operator, limit, precision } => {
            check_threshold(update, field, *operator, *limit, *precision)
        },
        RuleSpec::Range { field, min, max, inclusive, precision } => {
            check_range(update, field, *min, *max, *inclusive, *precision)
        },
        RuleSpec::SetMembership { field, values, mode } => {
            check_membership(update, field, values, *mode)
        },
    }
}

fn check_threshold(
    update: &MarketDataUpdate,
    field: &str,
    operator: ComparisonOp,
    limit: Decimal,
    precision: u32,
) -> EngineResult<RuleCheck> {
    validate_precision(precision)?;

    let (raw, value) = match numeric_field(update, field) {
        Ok(found) => found,
        Err(reason) => return Ok(RuleCheck::Skipped(reason)),
    };

    let value = round(value, precision);
    let limit = round(limit, precision);

    if operator.holds(value, limit) {
        Ok(RuleCheck::Fired(raw.clone()))
    } else {
        Ok(RuleCheck::Clear)
    }
}

fn check_range(
    update: &MarketDataUpdate,
    field: &str,
    min: Decimal,
    max: Decimal,
    inclusive: bool,
    precision: u32,
) -> EngineResult<RuleCheck> {
    validate_precision(precision)?;
    if min > max {
        return Err(EngineError::InvertedRange { min, max });
    }

    let (raw, value) = match numeric_field(update, field) {
        Ok(found) => found,
        Err(reason) => return Ok(RuleCheck::Skipped(reason)),
    };

    let value = round(value, precision);
    let (min, max) = (round(min, precision), round(max, precision));

    let inside = if inclusive {
        min <= value && value <= max
    } else {
        min < value && value < max
    };

    if inside {
        Ok(RuleCheck::Clear)
    } else {
        Ok(RuleCheck::Fired(raw.clone()))
    }
}

fn check_membership(
    update: &MarketDataUpdate,
    field: &str,
    values: &BTreeSet<String>,
    mode: MembershipMode,
) -> EngineResult<RuleCheck> {
    if values.is_empty() {
        return Err(EngineError::EmptyMembershipSet { field: field.to_string() });
    }

    let Some(raw) = update.field(field) else {
        return Ok(RuleCheck::Skipped(SkipReason::MissingField(field.to_string())));
    };

    let Some(text) = raw.as_text() else {
        return Ok(RuleCheck::Skipped(SkipReason::NoText(field.to_string())));
    };

    let listed = values.contains(&text);
    let fired = match mode {
        MembershipMode::Allow => !listed,
        MembershipMode::Deny => listed,
    };

    if fired {
        Ok(RuleCheck::Fired(raw.clone()))
    } else {
        Ok(RuleCheck::Clear)
    }
}

fn numeric_field<'a>(
    update: &'a MarketDataUpdate,
    field: &str,
) -> Result<(&'a FieldValue, Decimal), SkipReason> {
    let raw = update
        .field(field)
        .ok_or_else(|| SkipReason::MissingField(field.to_string()))?;
    let value = raw
        .as_decimal()
        .ok_or_else(|| SkipReason::NotNumeric(field.to_string()))?;
    Ok((raw, value))
}

fn validate_precision(precision: u32) -> EngineResult<()> {
    if precision > MAX_PRECISION {
        return Err(EngineError::InvalidPrecision { precision, max: MAX_PRECISION });
    }
    Ok(())
}

fn round(value: Decimal, precision: u32) -> Decimal {
    value.round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
}

// =============================================================================
// Tests
// =============================================================================
