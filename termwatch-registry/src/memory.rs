//! In-memory term service collaborators
//!
//! Used for testing and development without a term service.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

use termwatch_domain::{Term, TermChangeEvent, TermId};

use crate::error::RegistryError;
use crate::repository::{TermChangeFeed, TermRepository};

// =============================================================================
// Memory Term Repository
// =============================================================================

/// In-memory term repository
pub struct MemoryTermRepository {
    terms: RwLock<BTreeMap<TermId, Term>>,
}

impl MemoryTermRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            terms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a repository holding `terms`
    pub fn with_terms(terms: impl IntoIterator<Item = Term>) -> Self {
        let repository = Self::new();
        for term in terms {
            repository.upsert(term);
        }
        repository
    }

    /// Insert or replace a term
    pub fn upsert(&self, term: Term) {
        let mut terms = self.terms.write().unwrap_or_else(|e| e.into_inner());
        terms.insert(term.id.clone(), term);
    }

    /// Number of stored terms
    pub fn len(&self) -> usize {
        self.terms.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the repository is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryTermRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TermRepository for MemoryTermRepository {
    async fn load_all(&self) -> Result<Vec<Term>, RegistryError> {
        let terms = self
            .terms
            .read()
            .map_err(|e| RegistryError::Repository(format!("Failed to acquire read lock: {}", e)))?;
        Ok(terms.values().cloned().collect())
    }
}

// =============================================================================
// Stub Term Feed
// =============================================================================

/// Stub change feed; tests push changes with [`StubTermFeed::push`].
pub struct StubTermFeed {
    subscriber: RwLock<Option<mpsc::Sender<TermChangeEvent>>>,
}

impl StubTermFeed {
    /// Create a feed with no subscriber
    pub fn new() -> Self {
        Self {
            subscriber: RwLock::new(None),
        }
    }

    /// Deliver a change to the subscriber.
    ///
    /// Returns `false` if nobody is subscribed or the subscriber hung up.
    pub async fn push(&self, change: TermChangeEvent) -> bool {
        let sender = self
            .subscriber
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match sender {
            Some(sender) => sender.send(change).await.is_ok(),
            None => false,
        }
    }

    /// Close the feed; the subscriber sees the channel end.
    pub fn close(&self) {
        self.subscriber.write().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl Default for StubTermFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TermChangeFeed for StubTermFeed {
    async fn subscribe(&self) -> Result<mpsc::Receiver<TermChangeEvent>, RegistryError> {
        let (tx, rx) = mpsc::channel(100);
        let mut subscriber = self
            .subscriber
            .write()
            .map_err(|e| RegistryError::Feed(format!("Failed to acquire subscriber lock: {}", e)))?;
        *subscriber = Some(tx);
        Ok(rx)
    }
}

// =============================================================================
// Tests
// =============================================================================
