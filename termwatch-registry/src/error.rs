//! Registry errors

use termwatch_domain::TermId;
use thiserror::Error;

/// Errors that can occur while maintaining the term registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Change carries a version not newer than the one already held
    #[error("Stale change for term {term_id}: held v{held}, received v{received}")]
    StaleVersion {
        /// Term the change refers to
        term_id: TermId,
        /// Version currently held
        held: u64,
        /// Version carried by the change
        received: u64,
    },

    /// No snapshot has been published yet
    #[error("Term registry has no snapshot yet")]
    Unavailable,

    /// Persistence collaborator failed
    #[error("Term repository error: {0}")]
    Repository(String),

    /// Term change feed failed
    #[error("Term change feed error: {0}")]
    Feed(String),
}

impl RegistryError {
    /// Create a stale version error
    pub fn stale(term_id: &TermId, held: u64, received: u64) -> Self {
        Self::StaleVersion {
            term_id: term_id.clone(),
            held,
            received,
        }
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;
