//! Term Registry: the single shared pointer to the current snapshot.
//!
//! Readers load the current [`TermSnapshot`] lock-free and keep it for the
//! whole evaluation of one update. The term listener is the only writer; it
//! builds a successor snapshot off to the side and swaps it in atomically.
//! An older snapshot held by an in-flight evaluation is never invalidated.
//!
//! ```text
//! TermChangeFeed ──► apply_change ──► build successor ──► swap
//!                                                          │
//!  lane workers ◄──────────── snapshot() (lock-free) ◄─────┘
//! ```

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use tokio::sync::watch;
use tracing::{debug, info};

use termwatch_domain::{ScopeKey, Term, TermChangeEvent};

use crate::error::RegistryResult;
use crate::snapshot::{TermBucket, TermSnapshot};

/// Versioned, atomically swapped view of the active terms.
pub struct TermRegistry {
    current: ArcSwapOption<TermSnapshot>,
    /// Serializes writers; readers never touch it
    writer: Mutex<()>,
    /// Latest published snapshot version (0 = none yet)
    versions: watch::Sender<u64>,
}

impl TermRegistry {
    /// Create a registry with no snapshot. Lookups return empty buckets
    /// and `wait_ready` blocks until the first snapshot is published.
    pub fn new() -> Self {
        let (versions, _) = watch::channel(0);
        Self {
            current: ArcSwapOption::empty(),
            writer: Mutex::new(()),
            versions,
        }
    }

    /// Current snapshot, if one has been published.
    pub fn snapshot(&self) -> Option<Arc<TermSnapshot>> {
        self.current.load_full()
    }

    /// Version of the current snapshot, if any.
    pub fn snapshot_version(&self) -> Option<u64> {
        self.current.load().as_ref().map(|s| s.version())
    }

    /// Whether a first snapshot exists.
    pub fn is_ready(&self) -> bool {
        self.current.load().is_some()
    }

    /// Active terms for `scope`, ordered by id. Empty when unknown or not ready.
    pub fn active_terms(&self, scope: &ScopeKey) -> TermBucket {
        match self.current.load().as_ref() {
            Some(snapshot) => snapshot.active_terms(scope),
            None => TermBucket::from(Vec::new()),
        }
    }

    /// Install terms loaded from the persistence collaborator.
    ///
    /// On an empty registry this publishes the first snapshot (even when
    /// `terms` is empty). Otherwise each term is merged like a change event
    /// and stale entries are ignored.
    pub fn bootstrap(&self, terms: Vec<Term>) -> Arc<TermSnapshot> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let next = match self.current.load_full() {
            None => TermSnapshot::from_terms(1, terms),
            Some(current) => {
                let mut next = (*current).clone();
                for term in terms {
                    match next.with_term(term) {
                        Ok(merged) => next = merged,
                        Err(e) => debug!(error = %e, "Bootstrap skipped stale term"),
                    }
                }
                next
            },
        };

        info!(
            snapshot_version = next.version(),
            terms = next.term_count(),
            active = next.active_count(),
            "Term registry bootstrapped"
        );
        self.publish(next)
    }

    /// Apply a change from the term service and publish the successor snapshot.
    ///
    /// # Errors
    /// `RegistryError::StaleVersion` if the change is not newer than the
    /// held version; the current snapshot stays in place.
    pub fn apply_change(&self, change: TermChangeEvent) -> RegistryResult<Arc<TermSnapshot>> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let current = self.current.load_full().unwrap_or_else(|| Arc::new(TermSnapshot::empty()));
        let term = change.into_term();
        let (term_id, version, status) = (term.id.clone(), term.version, term.status);

        let next = current.with_term(term)?;

        debug!(
            %term_id,
            term_version = version,
            %status,
            snapshot_version = next.version(),
            "Term change applied"
        );
        Ok(self.publish(next))
    }

    /// Resolve once a snapshot exists and return it.
    pub async fn wait_ready(&self) -> Arc<TermSnapshot> {
        let mut versions = self.versions.subscribe();
        loop {
            if let Some(snapshot) = self.snapshot() {
                return snapshot;
            }
            // The sender lives in `self`, so this only returns on a new version
            let _ = versions.changed().await;
        }
    }

    /// Watch published snapshot versions.
    pub fn subscribe_versions(&self) -> watch::Receiver<u64> {
        self.versions.subscribe()
    }

    fn publish(&self, snapshot: TermSnapshot) -> Arc<TermSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.current.store(Some(snapshot.clone()));
        self.versions.send_replace(snapshot.version());
        snapshot
    }
}

impl Default for TermRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
