//! Immutable point-in-time view of terms.
//!
//! A snapshot is never mutated after construction. Applying a change
//! produces a new snapshot that shares every untouched term and scope
//! bucket with its predecessor; only the buckets of the changed term's old
//! and new scope are rebuilt.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use termwatch_domain::{ScopeKey, Term, TermId, TermStatus};

use crate::error::{RegistryError, RegistryResult};

/// Terms sharing a scope key, ordered by term id.
pub type TermBucket = Arc<[Arc<Term>]>;

/// Immutable point-in-time view of the term set.
#[derive(Debug, Clone)]
pub struct TermSnapshot {
    version: u64,
    /// Every known term regardless of status (needed for version checks)
    terms: BTreeMap<TermId, Arc<Term>>,
    /// Active terms only, bucketed by scope key
    by_scope: HashMap<ScopeKey, TermBucket>,
}

impl TermSnapshot {
    /// Empty snapshot at version 0.
    pub fn empty() -> Self {
        Self {
            version: 0,
            terms: BTreeMap::new(),
            by_scope: HashMap::new(),
        }
    }

    /// Build a snapshot from a full term listing.
    ///
    /// When the listing contains the same id twice the higher version wins.
    pub fn from_terms(version: u64, terms: impl IntoIterator<Item = Term>) -> Self {
        let mut latest: BTreeMap<TermId, Arc<Term>> = BTreeMap::new();
        for term in terms {
            let newer = latest
                .get(&term.id)
                .map(|held| term.version > held.version)
                .unwrap_or(true);
            if newer {
                latest.insert(term.id.clone(), Arc::new(term));
            }
        }

        let mut grouped: HashMap<ScopeKey, Vec<Arc<Term>>> = HashMap::new();
        // BTreeMap iteration keeps each bucket ordered by id
        for term in latest.values().filter(|t| t.status == TermStatus::Active) {
            grouped.entry(term.scope.clone()).or_default().push(term.clone());
        }

        Self {
            version,
            terms: latest,
            by_scope: grouped.into_iter().map(|(k, v)| (k, TermBucket::from(v))).collect(),
        }
    }

    /// Snapshot version; increases by one per published snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of known terms (any status).
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Number of Active terms.
    pub fn active_count(&self) -> usize {
        self.by_scope.values().map(|bucket| bucket.len()).sum()
    }

    /// Look up a term by id (any status).
    pub fn get(&self, id: &TermId) -> Option<&Arc<Term>> {
        self.terms.get(id)
    }

    /// Active terms for a scope key, ordered by id. Unknown keys yield an empty bucket.
    pub fn active_terms(&self, scope: &ScopeKey) -> TermBucket {
        self.by_scope
            .get(scope)
            .cloned()
            .unwrap_or_else(|| TermBucket::from(Vec::new()))
    }

    /// Terms applicable to an event exposing `scopes` at `at`.
    ///
    /// Union over all scope keys, filtered to Active and effective, ordered
    /// by id, each term at most once.
    pub fn applicable_terms(&self, scopes: &[ScopeKey], at: DateTime<Utc>) -> Vec<Arc<Term>> {
        let mut terms: Vec<Arc<Term>> = scopes
            .iter()
            .filter_map(|scope| self.by_scope.get(scope))
            .flat_map(|bucket| bucket.iter())
            .filter(|term| term.applies_at(at))
            .cloned()
            .collect();
        terms.sort_by(|a, b| a.id.cmp(&b.id));
        terms.dedup_by(|a, b| a.id == b.id);
        terms
    }

    /// Produce the successor snapshot with `term` replacing any held version.
    ///
    /// # Errors
    /// `RegistryError::StaleVersion` when `term.version` is not newer than
    /// the held version. `self` is untouched either way.
    pub fn with_term(&self, term: Term) -> RegistryResult<Self> {
        let previous = self.terms.get(&term.id).cloned();
        if let Some(held) = &previous {
            if term.version <= held.version {
                return Err(RegistryError::stale(&term.id, held.version, term.version));
            }
        }

        let term = Arc::new(term);
        let mut next = self.clone();
        next.version = self.version + 1;
        next.terms.insert(term.id.clone(), term.clone());

        if let Some(held) = previous.filter(|held| held.status == TermStatus::Active) {
            next.rebuild_bucket(&held.scope, &term.id, None);
        }
        if term.status == TermStatus::Active {
            let (scope, id) = (term.scope.clone(), term.id.clone());
            next.rebuild_bucket(&scope, &id, Some(term));
        }

        Ok(next)
    }

    /// Replace the bucket for `scope` with one where `id` is removed and,
    /// if given, `replacement` inserted in id order.
    fn rebuild_bucket(&mut self, scope: &ScopeKey, id: &TermId, replacement: Option<Arc<Term>>) {
        let mut bucket: Vec<Arc<Term>> = self
            .by_scope
            .get(scope)
            .map(|b| b.iter().filter(|t| &t.id != id).cloned().collect())
            .unwrap_or_default();

        if let Some(term) = replacement {
            let position = bucket.partition_point(|t| t.id < term.id);
            bucket.insert(position, term);
        }

        if bucket.is_empty() {
            self.by_scope.remove(scope);
        } else {
            self.by_scope.insert(scope.clone(), TermBucket::from(bucket));
        }
    }
}

impl Default for TermSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
