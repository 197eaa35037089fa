//! Termwatch Term Registry
//!
//! In-memory, versioned view of the terms owned by the term service.
//!
//! # Architecture
//!
//! - **Snapshot**: immutable point-in-time view, bucketed by scope key
//! - **Registry**: atomically swapped pointer to the current snapshot
//! - **Repository / feed traits**: ports to the term service
//! - **In-memory collaborators**: stubs for testing and development
//!
//! # Usage
//!
//! ```rust
//! use termwatch_registry::TermRegistry;
//! use termwatch_domain::ScopeKey;
//!
//! let registry = TermRegistry::new();
//! registry.bootstrap(Vec::new());
//!
//! let terms = registry.active_terms(&ScopeKey::instrument("USD-SWAP"));
//! assert!(terms.is_empty());
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
mod registry;
mod repository;
mod snapshot;

// Re-exports
pub use error::{RegistryError, RegistryResult};
pub use memory::{MemoryTermRepository, StubTermFeed};
pub use registry::TermRegistry;
pub use repository::{TermChangeFeed, TermRepository};
pub use snapshot::{TermBucket, TermSnapshot};
