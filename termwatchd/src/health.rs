//! Health and metrics state.
//!
//! Lanes, the term listener and the pipeline write into [`HealthState`];
//! the admin API reads a [`HealthReport`] or the Prometheus text exposition
//! from it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use termwatch_registry::TermRegistry;

use crate::config::Environment;
use crate::error::{DaemonResult, EngineFault};
use crate::pipeline::EventState;

/// Failed or dead-lettered events kept for the health report.
pub const RECENT_FAILURES: usize = 64;

// =============================================================================
// Metrics
// =============================================================================

/// Prometheus metrics for the evaluation engine.
pub struct Metrics {
    registry: Registry,
    events: IntCounterVec,
    decisions: IntCounter,
    alerts_published: IntCounter,
    duplicates_suppressed: IntCounter,
    budget_exhausted: IntCounter,
    rule_defects: IntCounter,
    malformed: IntCounter,
    out_of_order: IntCounter,
    registry_version: IntGauge,
    lane_depth: IntGaugeVec,
}

impl Metrics {
    /// Create and register every metric.
    pub fn new() -> DaemonResult<Self> {
        let registry = Registry::new_custom(Some("termwatch".to_string()), None)?;

        let events = IntCounterVec::new(
            Opts::new("events_total", "Events processed, by final state"),
            &["state"],
        )?;
        let decisions = IntCounter::new("decisions_total", "Violation decisions produced")?;
        let alerts_published = IntCounter::new("alerts_published_total", "Alerts accepted by the sink")?;
        let duplicates_suppressed = IntCounter::new(
            "duplicates_suppressed_total",
            "Alerts suppressed by the publish ledger or collapsed by the sink",
        )?;
        let budget_exhausted =
            IntCounter::new("publish_budget_exhausted_total", "Events whose alerts could not be published")?;
        let rule_defects = IntCounter::new("rule_defects_total", "Defective term and event pairs")?;
        let malformed = IntCounter::new("malformed_events_total", "Deliveries that could not be decoded")?;
        let out_of_order = IntCounter::new("out_of_order_events_total", "Events released after a higher sequence")?;
        let registry_version = IntGauge::new("registry_snapshot_version", "Current term registry snapshot version")?;
        let lane_depth = IntGaugeVec::new(Opts::new("lane_queue_depth", "Events queued per lane"), &["lane"])?;

        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(alerts_published.clone()))?;
        registry.register(Box::new(duplicates_suppressed.clone()))?;
        registry.register(Box::new(budget_exhausted.clone()))?;
        registry.register(Box::new(rule_defects.clone()))?;
        registry.register(Box::new(malformed.clone()))?;
        registry.register(Box::new(out_of_order.clone()))?;
        registry.register(Box::new(registry_version.clone()))?;
        registry.register(Box::new(lane_depth.clone()))?;

        Ok(Self {
            registry,
            events,
            decisions,
            alerts_published,
            duplicates_suppressed,
            budget_exhausted,
            rule_defects,
            malformed,
            out_of_order,
            registry_version,
            lane_depth,
        })
    }

    /// Prometheus text exposition.
    pub fn encode(&self) -> DaemonResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

// =============================================================================
// Lane Stats
// =============================================================================

/// Counters for one lane, shared between router, lane task and health.
#[derive(Debug, Default)]
pub struct LaneStats {
    queued: AtomicUsize,
    processed: AtomicU64,
    lag_ms: AtomicU64,
}

impl LaneStats {
    /// An event entered the lane queue.
    pub fn enqueued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// An event left the lane queue after waiting `waited`.
    pub fn dequeued(&self, waited: Duration) {
        let _ = self
            .queued
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.lag_ms.store(waited.as_millis() as u64, Ordering::Relaxed);
    }

    /// An event reached a final state.
    pub fn processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Events currently queued.
    pub fn queue_depth(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Health State
// =============================================================================

/// One Failed or DeadLettered event.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    /// When the failure was recorded
    pub at: DateTime<Utc>,
    /// Lane the event was on
    pub lane: usize,
    /// Broker delivery id
    pub delivery_id: u64,
    /// Delivery key
    pub partition_key: String,
    /// Event sequence, when the payload decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Final state of the event
    pub state: EventState,
    /// Fault label
    pub kind: &'static str,
    /// Human readable reason
    pub reason: String,
}

/// Shared health state.
pub struct HealthState {
    environment: Environment,
    started_at: DateTime<Utc>,
    registry: Arc<TermRegistry>,
    metrics: Metrics,
    lanes: Vec<Arc<LaneStats>>,
    recent_failures: Mutex<VecDeque<FailureRecord>>,
    shutdown: CancellationToken,
}

impl HealthState {
    /// Create health state for `lane_count` lanes.
    pub fn new(
        environment: Environment,
        registry: Arc<TermRegistry>,
        lane_count: usize,
        shutdown: CancellationToken,
    ) -> DaemonResult<Self> {
        Ok(Self {
            environment,
            started_at: Utc::now(),
            registry,
            metrics: Metrics::new()?,
            lanes: (0..lane_count).map(|_| Arc::new(LaneStats::default())).collect(),
            recent_failures: Mutex::new(VecDeque::with_capacity(RECENT_FAILURES)),
            shutdown,
        })
    }

    /// Stats handle for `lane`.
    pub fn lane(&self, lane: usize) -> Arc<LaneStats> {
        self.lanes[lane].clone()
    }

    /// Number of lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Record an event's final state.
    pub fn record_event(&self, lane: usize, state: EventState) {
        self.metrics.events.with_label_values(&[state.as_str()]).inc();
        if let Some(stats) = self.lanes.get(lane) {
            stats.processed();
        }
    }

    /// Record a Failed or DeadLettered event.
    pub fn record_failure(&self, record: FailureRecord) {
        let mut recent = self.recent_failures.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() == RECENT_FAILURES {
            recent.pop_front();
        }
        recent.push_back(record);
    }

    /// Record the decisions produced by one event.
    pub fn record_decisions(&self, count: usize) {
        self.metrics.decisions.inc_by(count as u64);
    }

    /// Record an alert accepted by the sink.
    pub fn record_published(&self, duplicate: bool) {
        self.metrics.alerts_published.inc();
        if duplicate {
            self.metrics.duplicates_suppressed.inc();
        }
    }

    /// Record an alert skipped because its dedup key was already published.
    pub fn record_suppressed(&self) {
        self.metrics.duplicates_suppressed.inc();
    }

    /// Record a per-event fault.
    pub fn record_fault(&self, fault: &EngineFault) {
        match fault {
            EngineFault::MalformedEvent(_) => self.metrics.malformed.inc(),
            EngineFault::RuleEvaluationDefect { .. } => self.metrics.rule_defects.inc(),
            EngineFault::PublishBudgetExhausted { .. } => self.metrics.budget_exhausted.inc(),
            EngineFault::TransientIo(_) | EngineFault::RegistryUnavailable => {},
        }
    }

    /// Record an event released out of sequence order.
    pub fn record_out_of_order(&self) {
        self.metrics.out_of_order.inc();
    }

    /// Record the registry snapshot version.
    pub fn record_registry_version(&self, version: u64) {
        self.metrics.registry_version.set(version as i64);
    }

    /// Prometheus text exposition.
    pub fn metrics_text(&self) -> DaemonResult<String> {
        for (index, stats) in self.lanes.iter().enumerate() {
            let lane = index.to_string();
            self.metrics
                .lane_depth
                .with_label_values(&[lane.as_str()])
                .set(stats.queue_depth() as i64);
        }
        if let Some(version) = self.registry.snapshot_version() {
            self.record_registry_version(version);
        }
        self.metrics.encode()
    }

    /// Point-in-time health report.
    pub fn report(&self) -> HealthReport {
        let registry_version = self.registry.snapshot_version();
        let status = if self.shutdown.is_cancelled() {
            "draining"
        } else if registry_version.is_none() {
            "starting"
        } else {
            "healthy"
        };

        let events = |state: EventState| self.metrics.events.with_label_values(&[state.as_str()]).get();

        HealthReport {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: self.environment.to_string(),
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            registry_snapshot_version: registry_version,
            lanes: self
                .lanes
                .iter()
                .enumerate()
                .map(|(lane, stats)| LaneReport {
                    lane,
                    queue_depth: stats.queue_depth(),
                    lag_ms: stats.lag_ms.load(Ordering::Relaxed),
                    processed: stats.processed.load(Ordering::Relaxed),
                })
                .collect(),
            counters: CounterReport {
                acknowledged: events(EventState::Acknowledged),
                skipped: events(EventState::Skipped),
                dead_lettered: events(EventState::DeadLettered),
                failed: events(EventState::Failed),
                decisions: self.metrics.decisions.get(),
                alerts_published: self.metrics.alerts_published.get(),
                duplicates_suppressed: self.metrics.duplicates_suppressed.get(),
                publish_budget_exhausted: self.metrics.budget_exhausted.get(),
                rule_defects: self.metrics.rule_defects.get(),
                malformed_events: self.metrics.malformed.get(),
                out_of_order_events: self.metrics.out_of_order.get(),
            },
            recent_failures: self
                .recent_failures
                .lock()
                .map(|recent| recent.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

// =============================================================================
// Report Types
// =============================================================================

/// Health endpoint body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `starting`, `healthy` or `draining`
    pub status: String,
    /// Crate version
    pub version: String,
    /// Deployment environment name
    pub environment: String,
    /// Seconds since the daemon started
    pub uptime_secs: u64,
    /// None until the first registry snapshot is loaded
    pub registry_snapshot_version: Option<u64>,
    /// One entry per processing lane
    pub lanes: Vec<LaneReport>,
    /// Totals since startup
    pub counters: CounterReport,
    /// Most recent dead-lettered or failed events, oldest first
    pub recent_failures: Vec<FailureRecord>,
}

/// Per-lane health.
#[derive(Debug, Clone, Serialize)]
pub struct LaneReport {
    /// Lane index
    pub lane: usize,
    /// Events waiting in the lane queue
    pub queue_depth: usize,
    /// Queue wait of the most recently dequeued event
    pub lag_ms: u64,
    /// Events the lane has settled
    pub processed: u64,
}

/// Engine counters.
#[derive(Debug, Clone, Serialize)]
pub struct CounterReport {
    /// Events acknowledged after evaluation
    pub acknowledged: u64,
    /// Events where every applicable term was skipped
    pub skipped: u64,
    /// Events sent to the dead letter queue
    pub dead_lettered: u64,
    /// Events settled as failed
    pub failed: u64,
    /// Violations found
    pub decisions: u64,
    /// Alerts accepted by the sink
    pub alerts_published: u64,
    /// Alerts already recorded as published
    pub duplicates_suppressed: u64,
    /// Events that ran out of publish attempts
    pub publish_budget_exhausted: u64,
    /// Rule checks that hit a defect
    pub rule_defects: u64,
    /// Payloads that did not decode
    pub malformed_events: u64,
    /// Events released below the last released sequence
    pub out_of_order_events: u64,
}

// =============================================================================
// Tests
// =============================================================================
