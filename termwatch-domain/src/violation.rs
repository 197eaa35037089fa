//! Violation decisions and their wire representation.
//!
//! A [`ViolationDecision`] is what the evaluator concludes; a
//! [`ViolationAlert`] is what the publisher puts on the outbound broker.
//! Both carry the same deterministic [`DedupKey`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::market_data::EventRef;
use crate::value_objects::{DomainError, FieldValue, InstrumentKey, ScopeKey, Severity, TermId};

// =============================================================================
// Dedup Key
// =============================================================================

/// Deterministic identifier of a (term version, triggering event) pair.
///
/// Formula: `SHA256(len|term_id, version, len|instrument, sequence)`.
/// String components are length-prefixed so `("AB", "C")` and `("A", "BC")`
/// never collide. Rendered as hex prefixed with `dedup_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Compute the key for a term version firing on an update.
    pub fn compute(
        term_id: &TermId,
        term_version: u64,
        instrument: &InstrumentKey,
        sequence: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((term_id.as_str().len() as u64).to_be_bytes());
        hasher.update(term_id.as_str().as_bytes());
        hasher.update(term_version.to_be_bytes());
        hasher.update((instrument.as_str().len() as u64).to_be_bytes());
        hasher.update(instrument.as_str().as_bytes());
        hasher.update(sequence.to_be_bytes());

        Self(format!("dedup_{}", hex::encode(hasher.finalize())))
    }

    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Violation Decision
// =============================================================================

/// A term firing on a market data update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationDecision {
    /// Term that fired
    pub term_id: TermId,
    /// Version of the term that fired
    pub term_version: u64,
    /// Scope key the term matched on
    pub scope: ScopeKey,
    /// Triggering update
    pub event: EventRef,
    /// Value of the rule's field on the triggering update
    pub observed: FieldValue,
    /// Severity copied from the term
    pub severity: Severity,
    /// When the decision was made
    pub decided_at: DateTime<Utc>,
    /// Update was evaluated out of its key's sequence order
    #[serde(default)]
    pub out_of_order: bool,
    /// Idempotency key for publication
    pub dedup_key: DedupKey,
}

impl ViolationDecision {
    /// Instrument of the triggering update
    pub fn instrument(&self) -> &InstrumentKey {
        &self.event.instrument
    }

    /// Sequence number of the triggering update
    pub fn sequence(&self) -> u64 {
        self.event.sequence
    }
}

// =============================================================================
// Violation Alert
// =============================================================================

/// Wire representation of a decision plus delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationAlert {
    /// Unique per delivery attempt series (UUID v7)
    pub alert_id: Uuid,
    /// Equal to the decision's dedup key; consumers collapse on it
    pub idempotency_key: DedupKey,
    /// The decision being published
    pub decision: ViolationDecision,
    /// Delivery attempt, starting at 1
    pub attempt: u32,
    /// When this attempt was handed to the sink
    pub published_at: DateTime<Utc>,
}

impl ViolationAlert {
    /// Wrap a decision for its first delivery attempt.
    pub fn new(decision: ViolationDecision) -> Self {
        Self {
            alert_id: Uuid::now_v7(),
            idempotency_key: decision.dedup_key.clone(),
            decision,
            attempt: 1,
            published_at: Utc::now(),
        }
    }

    /// Stamp the alert for another attempt.
    pub fn next_attempt(&mut self) {
        self.attempt += 1;
        self.published_at = Utc::now();
    }

    /// Encode the alert body as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec(self).map_err(|e| DomainError::Encode(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
