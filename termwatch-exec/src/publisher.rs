//! Alert Publisher: violation decisions to the outbound alert sink.
//!
//! The publisher is the bridge between pure decisions and the impure
//! broker. It guarantees effectively-once delivery per dedup key through
//! the publish ledger, bounds each attempt with a timeout, and retries
//! transient failures with exponential backoff.
//!
//! # Flow
//!
//! ```text
//! ViolationDecision → Ledger claim → AlertSink::send (timeout, retry) → Ledger mark
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use termwatch_domain::{ViolationAlert, ViolationDecision};

use crate::backoff::BackoffPolicy;
use crate::error::ExecError;
use crate::ledger::{LedgerClaim, PublishLedger};
use crate::ports::{AlertSink, SinkError, SinkReceipt};

// =============================================================================
// Publish Types
// =============================================================================

/// Retry and timeout settings for one publication.
#[derive(Debug, Clone, Copy)]
pub struct PublisherConfig {
    /// Attempts per publication, including the first
    pub max_attempts: u32,
    /// Upper bound on a single `send`
    pub attempt_timeout: Duration,
    /// Delay between attempts
    pub backoff: BackoffPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(2),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Result of publishing one decision.
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    /// The sink accepted the alert
    Published {
        /// Attempts used
        attempts: u32,
        /// Sink acknowledgement
        receipt: SinkReceipt,
    },
    /// The dedup key was published earlier; nothing sent
    AlreadyPublished,
    /// The alert could not be published
    Failed {
        /// Final error
        error: ExecError,
        /// Attempts used
        attempts: u32,
    },
}

impl PublishOutcome {
    /// The alert is known to be delivered (now or earlier).
    pub fn is_delivered(&self) -> bool {
        !matches!(self, PublishOutcome::Failed { .. })
    }

    /// A later round may still succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PublishOutcome::Failed { error, .. } => error.is_retryable(),
            _ => false,
        }
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Publishes violation alerts with idempotency guarantees.
pub struct AlertPublisher<S: AlertSink> {
    sink: Arc<S>,
    ledger: Arc<PublishLedger>,
    config: PublisherConfig,
}

impl<S: AlertSink> AlertPublisher<S> {
    /// Create a new publisher.
    pub fn new(sink: Arc<S>, ledger: Arc<PublishLedger>, config: PublisherConfig) -> Self {
        Self { sink, ledger, config }
    }

    /// Publish one decision.
    ///
    /// Never returns early on a transient failure: the attempt budget is
    /// spent first. A fatal sink error ends the publication immediately.
    pub async fn publish(&self, decision: &ViolationDecision) -> PublishOutcome {
        let key = &decision.dedup_key;

        match self.ledger.claim(key) {
            Ok(LedgerClaim::Claimed) => {},
            Ok(LedgerClaim::AlreadyPublished) => {
                debug!(dedup_key = %key, "Alert already published, skipping");
                return PublishOutcome::AlreadyPublished;
            },
            Ok(LedgerClaim::InFlight) => {
                return PublishOutcome::Failed {
                    error: ExecError::InFlight(key.clone()),
                    attempts: 0,
                };
            },
            Err(error) => return PublishOutcome::Failed { error, attempts: 0 },
        }

        let outcome = self.send_with_retry(decision).await;

        let settled = match &outcome {
            PublishOutcome::Published { .. } => self.ledger.mark_published(key),
            _ => self.ledger.release(key),
        };
        if let Err(e) = settled {
            error!(dedup_key = %key, error = %e, "Failed to update publish ledger");
        }

        outcome
    }

    async fn send_with_retry(&self, decision: &ViolationDecision) -> PublishOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut alert = ViolationAlert::new(decision.clone());
        let mut backoff = self.config.backoff.start();

        loop {
            let result =
                tokio::time::timeout(self.config.attempt_timeout, self.sink.send(&alert)).await;

            let failure = match result {
                Ok(Ok(receipt)) => {
                    info!(
                        term_id = %decision.term_id,
                        instrument = %decision.instrument(),
                        sequence = decision.sequence(),
                        alert_id = %alert.alert_id,
                        attempt = alert.attempt,
                        duplicate = receipt.duplicate,
                        "Alert published"
                    );
                    return PublishOutcome::Published { attempts: alert.attempt, receipt };
                },
                Ok(Err(SinkError::Fatal(message))) => {
                    error!(
                        dedup_key = %decision.dedup_key,
                        attempt = alert.attempt,
                        %message,
                        "Alert rejected by sink"
                    );
                    return PublishOutcome::Failed {
                        error: ExecError::Fatal(message),
                        attempts: alert.attempt,
                    };
                },
                Ok(Err(SinkError::Transient(message))) => ExecError::Transient(message),
                Err(_) => ExecError::Timeout(format!(
                    "send exceeded {}ms",
                    self.config.attempt_timeout.as_millis()
                )),
            };

            if alert.attempt >= max_attempts {
                error!(
                    dedup_key = %decision.dedup_key,
                    attempts = alert.attempt,
                    error = %failure,
                    "Alert retry budget exhausted"
                );
                return PublishOutcome::Failed {
                    error: ExecError::BudgetExhausted {
                        attempts: alert.attempt,
                        last_error: failure.to_string(),
                    },
                    attempts: alert.attempt,
                };
            }

            let delay = backoff.next_delay();
            warn!(
                dedup_key = %decision.dedup_key,
                attempt = alert.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Alert publish failed, retrying"
            );
            tokio::time::sleep(delay).await;
            alert.next_attempt();
        }
    }

    /// Get the publish ledger.
    pub fn ledger(&self) -> &PublishLedger {
        &self.ledger
    }

    /// Get the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

// =============================================================================
// Tests
// =============================================================================
