//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Term Registry (bootstrap + term listener)
//! - Ordering Router and lane pool
//! - Evaluation pipeline and alert publisher
//! - API Server (health, metrics)
//!
//! # Lifecycle
//!
//! 1. Validate the lane pool
//! 2. Bootstrap the term registry from the repository
//! 3. Subscribe to the term change feed and the inbound stream
//! 4. Start API server, term listener, lanes and router
//! 5. Route deliveries until the stream ends or shutdown is requested
//! 6. Drain lanes (queued and buffered events run to completion), then stop

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use termwatch_exec::{
    AlertPublisher, AlertSink, InboundSource, PublishLedger, StubAlertSink, StubInbound,
};
use termwatch_registry::{
    MemoryTermRepository, StubTermFeed, TermChangeFeed, TermRegistry, TermRepository,
};

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::health::HealthState;
use crate::lane::Lane;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::resequencer::Resequencer;
use crate::router::Router;
use crate::term_listener::TermListener;

// =============================================================================
// Daemon
// =============================================================================

/// The main termwatch daemon.
pub struct Daemon<I: InboundSource + 'static, S: AlertSink + 'static> {
    /// Configuration
    config: Config,
    /// Inbound market data stream
    inbound: Arc<I>,
    /// Outbound alert broker
    sink: Arc<S>,
    /// Term persistence (bootstrap)
    repository: Arc<dyn TermRepository>,
    /// Term change stream
    feed: Arc<dyn TermChangeFeed>,
    /// Term registry
    registry: Arc<TermRegistry>,
    /// Published dedup keys
    ledger: Arc<PublishLedger>,
}

impl Daemon<StubInbound, StubAlertSink> {
    /// Create a new daemon with stub components (for testing/development).
    pub fn new_stub(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(StubInbound::default()),
            Arc::new(StubAlertSink::new()),
            Arc::new(MemoryTermRepository::new()),
            Arc::new(StubTermFeed::new()),
        )
    }
}

impl<I: InboundSource + 'static, S: AlertSink + 'static> Daemon<I, S> {
    /// Create a new daemon with provided components.
    pub fn new(
        config: Config,
        inbound: Arc<I>,
        sink: Arc<S>,
        repository: Arc<dyn TermRepository>,
        feed: Arc<dyn TermChangeFeed>,
    ) -> Self {
        let ledger = Arc::new(PublishLedger::new(config.publish.dedup_retention));
        Self {
            config,
            inbound,
            sink,
            repository,
            feed,
            registry: Arc::new(TermRegistry::new()),
            ledger,
        }
    }

    /// Get the term registry.
    pub fn registry(&self) -> Arc<TermRegistry> {
        self.registry.clone()
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT) and every
    /// lane has drained.
    pub async fn run(self) -> DaemonResult<()> {
        let shutdown = CancellationToken::new();

        let signal = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    signal.cancel();
                },
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        });

        self.run_until(shutdown).await
    }

    /// Run until `shutdown` is cancelled or the inbound stream ends.
    pub async fn run_until(self, shutdown: CancellationToken) -> DaemonResult<()> {
        self.start(shutdown).await?.join().await
    }

    /// Start every task and return once the daemon is running.
    ///
    /// # Errors
    /// Lane allocation, term feed or inbound subscription and API bind
    /// failures. Nothing is left running when this fails.
    pub async fn start(self, shutdown: CancellationToken) -> DaemonResult<DaemonHandle> {
        let lanes = self.config.lanes.clone();
        lanes.validate()?;

        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            lanes = lanes.count,
            lane_capacity = lanes.capacity,
            "Starting termwatch daemon"
        );

        let health = Arc::new(HealthState::new(
            self.config.environment,
            self.registry.clone(),
            lanes.count,
            shutdown.clone(),
        )?);

        // 1. Registry
        self.bootstrap_registry(&health).await;
        let changes = self.feed.subscribe().await?;

        // 2. Inbound stream
        let source = self.inbound.subscribe().await?;

        // 3. API server
        let listener = self.bind_api().await?;
        let api_addr = listener.local_addr().map_err(|e| DaemonError::ApiBind {
            addr: format!("{}:{}", self.config.api.host, self.config.api.port),
            reason: e.to_string(),
        })?;

        // Listener and API outlive the router so health stays visible while lanes drain
        let internal = shutdown.child_token();
        let api = Self::spawn_api_server(listener, health.clone(), internal.clone());
        info!(%api_addr, "API server started");
        let term_listener =
            TermListener::new(changes, self.registry.clone(), health.clone()).spawn(internal.clone());

        // 4. Lanes and router
        let publisher =
            AlertPublisher::new(self.sink.clone(), self.ledger.clone(), self.config.publisher_config());
        let pipeline = Arc::new(Pipeline::new(
            self.registry.clone(),
            publisher,
            self.inbound.clone(),
            health.clone(),
            PipelineSettings::from_config(&self.config),
            shutdown.clone(),
        ));

        let mut senders = Vec::with_capacity(lanes.count);
        let mut lane_tasks = Vec::with_capacity(lanes.count);
        for index in 0..lanes.count {
            let (tx, rx) = mpsc::channel(lanes.capacity);
            senders.push(tx);
            lane_tasks.push(
                Lane::new(
                    index,
                    rx,
                    Resequencer::new(
                        lanes.resequence_window,
                        lanes.resequence_hold,
                        lanes.resequence_idle,
                    ),
                    pipeline.clone(),
                    health.lane(index),
                )
                .spawn(),
            );
        }
        let router = Router::new(senders, health.clone());

        let report_health = health.clone();
        let task = tokio::spawn(async move {
            router.run(source, shutdown).await;

            let mut result = Ok(());
            for (index, lane) in lane_tasks.into_iter().enumerate() {
                if let Err(e) = lane.await {
                    error!(lane = index, error = %e, "Lane task failed");
                    result = Err(DaemonError::Task(format!("lane {}: {}", index, e)));
                }
            }

            internal.cancel();
            if let Err(e) = term_listener.await {
                warn!(error = %e, "Term listener task failed");
            }
            if let Err(e) = api.await {
                warn!(error = %e, "API server task failed");
            }

            let counters = report_health.report().counters;
            info!(
                acknowledged = counters.acknowledged,
                skipped = counters.skipped,
                dead_lettered = counters.dead_lettered,
                failed = counters.failed,
                alerts_published = counters.alerts_published,
                "Shutdown complete"
            );
            result
        });

        Ok(DaemonHandle { api_addr, health, task })
    }

    /// Load terms from the repository into the registry.
    ///
    /// An empty repository leaves the registry unready (lanes wait for the
    /// first change) unless empty registries are allowed.
    async fn bootstrap_registry(&self, health: &HealthState) {
        match self.repository.load_all().await {
            Ok(terms) if terms.is_empty() && !self.config.engine.allow_empty_registry => {
                info!("Term repository is empty, waiting for the first term change");
            },
            Ok(terms) => {
                let snapshot = self.registry.bootstrap(terms);
                health.record_registry_version(snapshot.version());
            },
            Err(e) => {
                warn!(error = %e, "Failed to load terms, waiting for term changes");
            },
        }
    }

    async fn bind_api(&self) -> DaemonResult<TcpListener> {
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::ApiBind { addr, reason: e.to_string() })
    }

    fn spawn_api_server(
        listener: TcpListener,
        health: Arc<HealthState>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let router = create_router(Arc::new(ApiState { health }));
        tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "API server error");
            }
        })
    }
}

// =============================================================================
// Daemon Handle
// =============================================================================

/// A running daemon.
pub struct DaemonHandle {
    api_addr: SocketAddr,
    health: Arc<HealthState>,
    task: JoinHandle<DaemonResult<()>>,
}

impl DaemonHandle {
    /// Address the API server is listening on.
    pub fn api_addr(&self) -> SocketAddr {
        self.api_addr
    }

    /// Shared health state.
    pub fn health(&self) -> Arc<HealthState> {
        self.health.clone()
    }

    /// Wait for the daemon to drain and stop.
    pub async fn join(self) -> DaemonResult<()> {
        self.task.await.map_err(|e| DaemonError::Task(e.to_string()))?
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let daemon = Daemon::new_stub(Config::test());

        assert!(!daemon.registry().is_ready());
        assert!(daemon.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_zero_lanes_is_fatal() {
        let mut config = Config::test();
        config.lanes.count = 0;

        let result = Daemon::new_stub(config).run_until(CancellationToken::new()).await;

        assert!(matches!(result, Err(DaemonError::LaneAllocation { requested: 0, .. })));
    }

    #[tokio::test]
    async fn test_api_bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = Config::test();
        config.api.port = taken.local_addr().unwrap().port();

        let result = Daemon::new_stub(config).start(CancellationToken::new()).await;

        assert!(matches!(result, Err(DaemonError::ApiBind { .. })));
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let mut config = Config::test();
        config.engine.allow_empty_registry = true;
        let shutdown = CancellationToken::new();

        let handle = Daemon::new_stub(config).start(shutdown.clone()).await.unwrap();
        let addr = handle.api_addr();

        // Server should be running on a port
        assert!(addr.port() > 0);

        // Can make a health check request
        let client = reqwest::Client::new();
        let response = client.get(format!("http://{}/health", addr)).send().await.unwrap();

        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["environment"], "test");
        drop(client);

        shutdown.cancel();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_repository_leaves_registry_unready() {
        let daemon = Daemon::new_stub(Config::test());
        let registry = daemon.registry();
        let shutdown = CancellationToken::new();

        let handle = daemon.start(shutdown.clone()).await.unwrap();
        assert!(!registry.is_ready());
        assert_eq!(handle.health().report().status, "starting");

        shutdown.cancel();
        handle.join().await.unwrap();
    }
}
