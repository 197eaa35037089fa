//! Execution layer error types.

use termwatch_domain::DedupKey;
use thiserror::Error;

/// Errors that can occur while talking to the broker collaborators.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// Broker or network hiccup; worth retrying
    #[error("Transient I/O error: {0}")]
    Transient(String),

    /// Broker rejected the operation for good
    #[error("Fatal broker error: {0}")]
    Fatal(String),

    /// A single attempt exceeded its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Retry budget exhausted
    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    BudgetExhausted {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: String,
    },

    /// Another publication of the same dedup key is in progress
    #[error("Publication already in flight: {0}")]
    InFlight(DedupKey),

    /// Publish ledger error (poisoned lock)
    #[error("Publish ledger error: {0}")]
    Ledger(String),

    /// Inbound source error (subscribe, ack, dead letter)
    #[error("Inbound source error: {0}")]
    Source(String),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] termwatch_domain::DomainError),
}

impl ExecError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Transient(_)
                | ExecError::Timeout(_)
                | ExecError::BudgetExhausted { .. }
                | ExecError::InFlight(_)
                | ExecError::Source(_)
        )
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
