//! Value Objects for the Termwatch Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Term identifier must be non-empty
    #[error("Invalid term id: {0}")]
    InvalidTermId(String),

    /// Instrument key must be non-empty
    #[error("Invalid instrument key: {0}")]
    InvalidInstrumentKey(String),

    /// Scope key could not be parsed or is empty
    #[error("Invalid scope key: {0}")]
    InvalidScopeKey(String),

    /// Market data update failed validation
    #[error("Invalid market data update: {0}")]
    InvalidUpdate(String),

    /// Market data payload could not be decoded
    #[error("Cannot decode market data update: {0}")]
    Decode(String),

    /// Alert could not be encoded for the wire
    #[error("Cannot encode alert: {0}")]
    Encode(String),

    /// Invalid term state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

// =============================================================================
// TermId
// =============================================================================

/// Stable, unique identifier of a term (e.g. `RATE_CAP_5PCT`).
///
/// Ordering is lexicographic, which is the evaluation order of terms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TermId(String);

impl TermId {
    /// Create a new TermId
    ///
    /// # Errors
    /// Returns `DomainError::InvalidTermId` if the id is blank
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::InvalidTermId("Term id must be non-empty".to_string()));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TermId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TermId> for String {
    fn from(id: TermId) -> Self {
        id.0
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// InstrumentKey
// =============================================================================

/// Instrument identifier carried by market data (e.g. `USD-SWAP`).
///
/// Sequence numbers are monotonic per instrument key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentKey(String);

impl InstrumentKey {
    /// Create a new InstrumentKey
    ///
    /// # Errors
    /// Returns `DomainError::InvalidInstrumentKey` if the key is blank
    pub fn new(key: impl Into<String>) -> Result<Self, DomainError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(DomainError::InvalidInstrumentKey(
                "Instrument key must be non-empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InstrumentKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InstrumentKey> for String {
    fn from(key: InstrumentKey) -> Self {
        key.0
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// ScopeKey
// =============================================================================

/// Dimension a term scope selects on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Matches the event's instrument key
    Instrument,
    /// Matches the event's account
    Account,
    /// Matches the event's desk
    Desk,
}

impl ScopeKind {
    fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Instrument => "instrument",
            ScopeKind::Account => "account",
            ScopeKind::Desk => "desk",
        }
    }
}

/// Selector determining which terms apply to an event.
///
/// A term applies to an event when the event exposes the same scope key.
///
/// # Examples
/// ```
/// # use termwatch_domain::value_objects::{ScopeKey, ScopeKind};
/// let scope = ScopeKey::parse("desk:rates-ny").unwrap();
/// assert_eq!(scope.kind(), ScopeKind::Desk);
/// assert_eq!(scope.value(), "rates-ny");
///
/// // Bare values select instruments
/// let scope = ScopeKey::parse("USD-SWAP").unwrap();
/// assert_eq!(scope, ScopeKey::instrument("USD-SWAP"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeKey {
    kind: ScopeKind,
    value: String,
}

impl ScopeKey {
    /// Create a scope key from explicit kind and value
    ///
    /// # Errors
    /// Returns `DomainError::InvalidScopeKey` if the value is blank
    pub fn new(kind: ScopeKind, value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::InvalidScopeKey("Scope value must be non-empty".to_string()));
        }
        Ok(Self { kind, value })
    }

    /// Instrument scope. Blank values are not validated here; use `new` for untrusted input.
    pub fn instrument(value: impl Into<String>) -> Self {
        Self { kind: ScopeKind::Instrument, value: value.into() }
    }

    /// Parse `kind:value`.
    ///
    /// Only `instrument:`, `account:` and `desk:` are read as a prefix; any
    /// other value (including one containing `:`, like `EUR:USD`) selects an
    /// instrument as-is.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw.split_once(':') {
            Some(("instrument", value)) => Self::new(ScopeKind::Instrument, value),
            Some(("account", value)) => Self::new(ScopeKind::Account, value),
            Some(("desk", value)) => Self::new(ScopeKind::Desk, value),
            _ => Self::new(ScopeKind::Instrument, raw),
        }
    }

    /// Get the scope dimension
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Get the selected value
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl TryFrom<String> for ScopeKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ScopeKey> for String {
    fn from(key: ScopeKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

// =============================================================================
// FieldValue
// =============================================================================

/// Value of a single market data field.
///
/// JSON numbers and numeric strings both decode as `Number` so that
/// publishers may send decimals as strings without losing precision.
/// Values no rule can compare (`null`, nested JSON, numbers outside the
/// `Decimal` range) still decode; rules reading them skip the term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Decimal field (rates, notionals, exposures)
    Number(Decimal),
    /// Free text field (currency, venue, counterparty)
    Text(String),
    /// Boolean field (halted, auction)
    Flag(bool),
    /// Explicit JSON `null`
    Null,
    /// Any other JSON value, kept as received
    Unusable(serde_json::Value),
}

impl FieldValue {
    /// Classify a raw JSON value.
    pub fn from_json(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Number(number) => match parse_decimal(&number.to_string()) {
                Some(value) => FieldValue::Number(value),
                None => FieldValue::Unusable(serde_json::Value::Number(number)),
            },
            serde_json::Value::String(text) => match parse_decimal(&text) {
                Some(value) => FieldValue::Number(value),
                None => FieldValue::Text(text),
            },
            serde_json::Value::Bool(flag) => FieldValue::Flag(flag),
            serde_json::Value::Null => FieldValue::Null,
            other => FieldValue::Unusable(other),
        }
    }

    /// Numeric view of the field, if it is a number.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Text view of the field, if it has one. Numbers render in their canonical form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Number(value) => Some(value.normalize().to_string()),
            FieldValue::Text(value) => Some(value.clone()),
            FieldValue::Flag(flag) => Some(flag.to_string()),
            FieldValue::Null | FieldValue::Unusable(_) => None,
        }
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw).ok().or_else(|| Decimal::from_scientific(raw).ok())
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(FieldValue::from_json)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(value) => write!(f, "{}", value),
            FieldValue::Text(value) => f.write_str(value),
            FieldValue::Flag(flag) => write!(f, "{}", flag),
            FieldValue::Null => f.write_str("null"),
            FieldValue::Unusable(raw) => write!(f, "{}", raw),
        }
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Severity attached to every violation a term produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational breach, no action expected
    Info,
    /// Breach that needs review
    #[default]
    Warning,
    /// Breach that needs immediate action
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
