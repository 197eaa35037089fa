//! Publish ledger for idempotent alert publication.
//!
//! The ledger remembers which dedup keys have already been published so a
//! redelivered or reprocessed event does not produce a second alert.
//!
//! # Flow
//!
//! 1. Claim the key (before sending)
//! 2. Send the alert
//! 3. Mark published on success, release on failure
//!
//! Published keys are retained up to a fixed count and evicted oldest
//! first. Eviction only weakens local suppression; the alert's idempotency
//! key still lets the downstream broker collapse the duplicate.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use termwatch_domain::DedupKey;

use crate::error::{ExecError, ExecResult};

/// Default number of published keys remembered.
pub const DEFAULT_RETENTION: usize = 100_000;

/// Result of claiming a dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerClaim {
    /// Caller owns the key and must mark or release it
    Claimed,
    /// Key was published before
    AlreadyPublished,
    /// Another publication of the key is running
    InFlight,
}

#[derive(Default)]
struct LedgerState {
    published: HashMap<DedupKey, DateTime<Utc>>,
    /// Publication order, oldest first
    order: VecDeque<DedupKey>,
    in_flight: HashSet<DedupKey>,
}

/// Bounded record of published dedup keys.
pub struct PublishLedger {
    state: RwLock<LedgerState>,
    retention: usize,
}

impl PublishLedger {
    /// Create a ledger remembering at most `retention` published keys.
    pub fn new(retention: usize) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            retention: retention.max(1),
        }
    }

    /// Claim `key` before publishing.
    pub fn claim(&self, key: &DedupKey) -> ExecResult<LedgerClaim> {
        let mut state = self.write()?;

        if state.published.contains_key(key) {
            return Ok(LedgerClaim::AlreadyPublished);
        }
        if !state.in_flight.insert(key.clone()) {
            return Ok(LedgerClaim::InFlight);
        }
        Ok(LedgerClaim::Claimed)
    }

    /// Record a successful publication of a claimed key.
    pub fn mark_published(&self, key: &DedupKey) -> ExecResult<()> {
        let mut state = self.write()?;

        state.in_flight.remove(key);
        if state.published.insert(key.clone(), Utc::now()).is_none() {
            state.order.push_back(key.clone());
        }

        while state.order.len() > self.retention {
            if let Some(evicted) = state.order.pop_front() {
                state.published.remove(&evicted);
            }
        }
        Ok(())
    }

    /// Give up a claim so a later attempt can publish the key.
    pub fn release(&self, key: &DedupKey) -> ExecResult<()> {
        self.write()?.in_flight.remove(key);
        Ok(())
    }

    /// Whether `key` is recorded as published.
    pub fn is_published(&self, key: &DedupKey) -> ExecResult<bool> {
        let state = self
            .state
            .read()
            .map_err(|e| ExecError::Ledger(format!("Failed to acquire read lock: {}", e)))?;
        Ok(state.published.contains_key(key))
    }

    /// When `key` was published, if it still is retained.
    pub fn published_at(&self, key: &DedupKey) -> ExecResult<Option<DateTime<Utc>>> {
        let state = self
            .state
            .read()
            .map_err(|e| ExecError::Ledger(format!("Failed to acquire read lock: {}", e)))?;
        Ok(state.published.get(key).copied())
    }

    /// Number of retained published keys.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.published.len()).unwrap_or(0)
    }

    /// Whether no published keys are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> ExecResult<std::sync::RwLockWriteGuard<'_, LedgerState>> {
        self.state
            .write()
            .map_err(|e| ExecError::Ledger(format!("Failed to acquire write lock: {}", e)))
    }
}

impl Default for PublishLedger {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
