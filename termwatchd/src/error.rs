//! Daemon error types.

use termwatch_domain::{DomainError, TermId};
use termwatch_engine::EngineError;
use termwatch_exec::ExecError;
use termwatch_registry::RegistryError;
use thiserror::Error;

/// Daemon-level errors. Any of these returned from `Daemon::run` ends the process.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Lane pool cannot be allocated
    #[error("Cannot allocate {requested} lanes (allowed: 1..={max})")]
    LaneAllocation {
        /// Requested lane count
        requested: usize,
        /// Configured ceiling
        max: usize,
    },

    /// Admin API could not bind its listener
    #[error("Failed to bind API to {addr}: {reason}")]
    ApiBind {
        /// Address requested
        addr: String,
        /// OS error
        reason: String,
    },

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Background task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Per-event failure taxonomy.
///
/// These never end the process; they decide what happens to one event and
/// are recorded in the health report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineFault {
    /// Broker or network hiccup that outlived its retries
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Payload could not be decoded or validated
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A term's rule cannot be evaluated
    #[error("Rule defect in {term_id} v{term_version}: {error}")]
    RuleEvaluationDefect {
        /// Defective term
        term_id: TermId,
        /// Defective version
        term_version: u64,
        /// The defect
        error: EngineError,
    },

    /// Some decisions could not be published within the retry budget
    #[error("Publish budget exhausted: {unpublished} of {total} alerts unpublished ({last_error})")]
    PublishBudgetExhausted {
        /// Decisions left unpublished
        unpublished: usize,
        /// Decisions produced by the event
        total: usize,
        /// Last publish error
        last_error: String,
    },

    /// No registry snapshot exists yet
    #[error("Term registry unavailable")]
    RegistryUnavailable,
}

impl EngineFault {
    /// Stable label for logs, metrics and the health report.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineFault::TransientIo(_) => "transient_io",
            EngineFault::MalformedEvent(_) => "malformed_event",
            EngineFault::RuleEvaluationDefect { .. } => "rule_evaluation_defect",
            EngineFault::PublishBudgetExhausted { .. } => "publish_budget_exhausted",
            EngineFault::RegistryUnavailable => "registry_unavailable",
        }
    }
}
