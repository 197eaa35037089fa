//! Market Data Types
//!
//! Inbound market data updates evaluated against terms.
//! Updates are immutable once emitted by the upstream feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value_objects::{DomainError, FieldValue, InstrumentKey, ScopeKey, ScopeKind};

// =============================================================================
// MarketDataUpdate
// =============================================================================

/// A single market data update for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDataUpdate {
    /// Instrument the update is for
    pub instrument: InstrumentKey,
    /// Booking account, when the feed is account-level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Trading desk, when the feed is desk-level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desk: Option<String>,
    /// Field/value set
    pub fields: BTreeMap<String, FieldValue>,
    /// Upstream timestamp of the update
    pub source_timestamp: DateTime<Utc>,
    /// Monotonic per instrument key
    #[serde(alias = "seq")]
    pub sequence: u64,
}

impl MarketDataUpdate {
    /// Create an update with no account or desk.
    pub fn new(
        instrument: InstrumentKey,
        fields: BTreeMap<String, FieldValue>,
        source_timestamp: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            instrument,
            account: None,
            desk: None,
            fields,
            source_timestamp,
            sequence,
        }
    }

    /// Decode and validate a JSON payload.
    ///
    /// # Errors
    /// `DomainError::Decode` when the payload is not a valid update,
    /// `DomainError::InvalidUpdate` when it decodes but carries no fields.
    pub fn decode(payload: &[u8]) -> Result<Self, DomainError> {
        let update: Self =
            serde_json::from_slice(payload).map_err(|e| DomainError::Decode(e.to_string()))?;
        update.validate()?;
        Ok(update)
    }

    /// Check structural invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.fields.is_empty() {
            return Err(DomainError::InvalidUpdate(format!(
                "update {}#{} carries no fields",
                self.instrument, self.sequence
            )));
        }
        if matches!(&self.account, Some(a) if a.trim().is_empty()) {
            return Err(DomainError::InvalidUpdate("account must be non-empty".to_string()));
        }
        if matches!(&self.desk, Some(d) if d.trim().is_empty()) {
            return Err(DomainError::InvalidUpdate("desk must be non-empty".to_string()));
        }
        Ok(())
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Scope keys this update exposes: instrument first, then account and desk.
    pub fn scope_keys(&self) -> Vec<ScopeKey> {
        let mut keys = Vec::with_capacity(3);
        keys.push(ScopeKey::instrument(self.instrument.as_str()));
        if let Some(account) = &self.account {
            if let Ok(key) = ScopeKey::new(ScopeKind::Account, account.as_str()) {
                keys.push(key);
            }
        }
        if let Some(desk) = &self.desk {
            if let Ok(key) = ScopeKey::new(ScopeKind::Desk, desk.as_str()) {
                keys.push(key);
            }
        }
        keys
    }

    /// Reference to this update for decision metadata.
    pub fn event_ref(&self) -> EventRef {
        EventRef {
            instrument: self.instrument.clone(),
            sequence: self.sequence,
            source_timestamp: self.source_timestamp,
        }
    }
}

/// Reference to the update that triggered a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    /// Instrument of the triggering update
    pub instrument: InstrumentKey,
    /// Sequence number of the triggering update
    pub sequence: u64,
    /// Upstream timestamp of the triggering update
    pub source_timestamp: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
