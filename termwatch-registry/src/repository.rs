//! Port definitions for the term service collaborators.
//!
//! The term service owns terms; the engine only reads them. These traits
//! are the two ways it reads: a full listing at startup and a change feed
//! afterwards.

use async_trait::async_trait;
use tokio::sync::mpsc;

use termwatch_domain::{Term, TermChangeEvent};

use crate::error::RegistryError;

/// Persistence collaborator backing term storage
#[async_trait]
pub trait TermRepository: Send + Sync {
    /// Load every term (any status) to bootstrap the registry
    async fn load_all(&self) -> Result<Vec<Term>, RegistryError>;
}

/// Change notifications from the term service
#[async_trait]
pub trait TermChangeFeed: Send + Sync {
    /// Subscribe to changes. Events arrive in the order the term service
    /// emitted them; the channel closes when the feed ends.
    async fn subscribe(&self) -> Result<mpsc::Receiver<TermChangeEvent>, RegistryError>;
}
