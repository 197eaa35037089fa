//! Term listener: applies term changes to the registry in receive order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use termwatch_domain::TermChangeEvent;
use termwatch_registry::{RegistryError, TermRegistry};

use crate::health::HealthState;

/// Single writer of the term registry.
pub struct TermListener {
    changes: mpsc::Receiver<TermChangeEvent>,
    registry: Arc<TermRegistry>,
    health: Arc<HealthState>,
}

impl TermListener {
    /// Create a listener over a subscribed change feed.
    pub fn new(
        changes: mpsc::Receiver<TermChangeEvent>,
        registry: Arc<TermRegistry>,
        health: Arc<HealthState>,
    ) -> Self {
        Self { changes, registry, health }
    }

    /// Start the listener in the background.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, shutdown: CancellationToken) {
        info!("Term listener started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                change = self.changes.recv() => match change {
                    Some(change) => self.apply(change),
                    None => {
                        info!("Term change feed closed");
                        break;
                    }
                },
            }
        }

        info!("Term listener stopped");
    }

    /// Apply one change; stale changes are logged and ignored.
    pub fn apply(&self, change: TermChangeEvent) {
        let term_id = change.term_id.clone();
        let version = change.version;
        let status = change.status;

        match self.registry.apply_change(change) {
            Ok(snapshot) => {
                self.health.record_registry_version(snapshot.version());
                info!(
                    %term_id,
                    term_version = version,
                    %status,
                    snapshot_version = snapshot.version(),
                    active_terms = snapshot.active_count(),
                    "Term registry updated"
                );
            },
            Err(RegistryError::StaleVersion { held, received, .. }) => {
                warn!(%term_id, held, received, "Ignoring stale term change");
            },
            Err(e) => {
                error!(%term_id, error = %e, "Failed to apply term change");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use termwatch_domain::{ComparisonOp, RuleSpec, ScopeKey, Term, TermId, TermStatus};

    fn term() -> Term {
        Term::new(
            TermId::new("RATE_CAP_5PCT").unwrap(),
            ScopeKey::instrument("USD-SWAP"),
            RuleSpec::Threshold {
                field: "rate".to_string(),
                operator: ComparisonOp::Gt,
                limit: dec!(5.0),
                precision: 2,
            },
            Utc::now() - Duration::hours(1),
        )
    }

    fn setup() -> (mpsc::Sender<TermChangeEvent>, TermListener, Arc<TermRegistry>, Arc<HealthState>) {
        let (tx, rx) = mpsc::channel(16);
        let registry = Arc::new(TermRegistry::new());
        let health = Arc::new(
            HealthState::new(Environment::Test, registry.clone(), 1, CancellationToken::new())
                .unwrap(),
        );
        (tx, TermListener::new(rx, registry.clone(), health.clone()), registry, health)
    }

    #[tokio::test]
    async fn test_changes_applied_in_order_until_feed_closes() {
        let (tx, listener, registry, health) = setup();
        let active = term();
        let suspended = active.transition(TermStatus::Suspended).unwrap();

        tx.send(TermChangeEvent::from(&active)).await.unwrap();
        tx.send(TermChangeEvent::from(&suspended)).await.unwrap();
        drop(tx);
        listener.spawn(CancellationToken::new()).await.unwrap();

        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.version(), 2);
        assert!(snapshot.active_terms(&ScopeKey::instrument("USD-SWAP")).is_empty());
        assert_eq!(health.report().registry_snapshot_version, Some(2));
    }

    #[tokio::test]
    async fn test_stale_change_is_ignored() {
        let (_tx, listener, registry, _health) = setup();
        let active = term();
        let suspended = active.transition(TermStatus::Suspended).unwrap();

        listener.apply(TermChangeEvent::from(&suspended));
        listener.apply(TermChangeEvent::from(&active));

        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.term_count(), 1);
        assert!(snapshot.active_terms(&ScopeKey::instrument("USD-SWAP")).is_empty());
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let (_tx, listener, _registry, _health) = setup();
        let shutdown = CancellationToken::new();
        let handle = listener.spawn(shutdown.clone());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
