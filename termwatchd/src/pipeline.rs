//! Evaluation pipeline: one event through its state machine.
//!
//! ```text
//! Received → Resolved → Evaluated → Published → Acknowledged
//!                          │
//!                          ├─► Skipped       (every applicable term skipped, acknowledged)
//!                          └─► Failed        (publish budget exhausted, dead-lettered)
//! Received ─► DeadLettered                   (malformed, dead-letter policy)
//! ```
//!
//! The delivery is acknowledged only once every decision it produced is
//! published, or was published before. An event is never dropped without
//! being acknowledged, dead-lettered or left for broker redelivery.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use termwatch_domain::{DomainError, MarketDataUpdate, ViolationDecision};
use termwatch_engine::{evaluate, EvaluationContext};
use termwatch_exec::{
    AlertPublisher, AlertSink, BackoffPolicy, DeliveryReceipt, ExecError, InboundSource,
    PublishOutcome,
};
use termwatch_registry::{TermRegistry, TermSnapshot};

use crate::config::{Config, MalformedPolicy};
use crate::error::EngineFault;
use crate::health::{FailureRecord, HealthState};

// =============================================================================
// Event State
// =============================================================================

/// Lifecycle state of one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Delivered to a lane, not yet resolved
    Received,
    /// Applicable terms resolved from one registry snapshot
    Resolved,
    /// Decisions produced
    Evaluated,
    /// Every decision published
    Published,
    /// Delivery acknowledged (final)
    Acknowledged,
    /// Nothing could be evaluated; acknowledged (final)
    Skipped,
    /// Routed to the dead-letter path (final)
    DeadLettered,
    /// Could not be completed; dead-lettered and reported (final)
    Failed,
}

impl EventState {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Received => "received",
            EventState::Resolved => "resolved",
            EventState::Evaluated => "evaluated",
            EventState::Published => "published",
            EventState::Acknowledged => "acknowledged",
            EventState::Skipped => "skipped",
            EventState::DeadLettered => "dead_lettered",
            EventState::Failed => "failed",
        }
    }

    /// The broker has been told what to do with the delivery.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            EventState::Acknowledged
                | EventState::Skipped
                | EventState::DeadLettered
                | EventState::Failed
        )
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventReport {
    /// Last state reached
    pub state: EventState,
    /// Decisions produced
    pub decisions: usize,
    /// Fault that cut the lifecycle short, if any
    pub fault: Option<EngineFault>,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Policies applied by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Rounds over the unpublished subset of an event's decisions
    pub publish_rounds: u32,
    /// Handling of undecodable deliveries
    pub malformed_policy: MalformedPolicy,
    /// Evaluate against an empty term set instead of waiting for the registry
    pub allow_empty_registry: bool,
    /// Attempts for acknowledge and dead-letter calls
    pub settle_attempts: u32,
    /// Delay between publish rounds and settle retries
    pub backoff: BackoffPolicy,
}

impl PipelineSettings {
    /// Settings from the daemon configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            publish_rounds: config.publish.rounds,
            malformed_policy: config.engine.malformed_policy,
            allow_empty_registry: config.engine.allow_empty_registry,
            settle_attempts: config.publish.max_attempts,
            backoff: config.backoff_policy(),
        }
    }
}

/// Drives events from delivery to acknowledgement. Shared by every lane.
pub struct Pipeline<I: InboundSource, S: AlertSink> {
    registry: Arc<TermRegistry>,
    publisher: AlertPublisher<S>,
    inbound: Arc<I>,
    health: Arc<HealthState>,
    settings: PipelineSettings,
    shutdown: CancellationToken,
}

impl<I: InboundSource, S: AlertSink> Pipeline<I, S> {
    /// Create a new pipeline.
    pub fn new(
        registry: Arc<TermRegistry>,
        publisher: AlertPublisher<S>,
        inbound: Arc<I>,
        health: Arc<HealthState>,
        settings: PipelineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self { registry, publisher, inbound, health, settings, shutdown }
    }

    /// Run a decoded event through evaluation, publication and acknowledgement.
    pub async fn process(
        &self,
        lane: usize,
        receipt: &DeliveryReceipt,
        update: &MarketDataUpdate,
        out_of_order: bool,
    ) -> EventReport {
        if out_of_order {
            self.health.record_out_of_order();
            debug!(
                lane,
                instrument = %update.instrument,
                sequence = update.sequence,
                "Event released out of order"
            );
        }

        // Received → Resolved
        let Some(snapshot) = self.resolve_snapshot().await else {
            warn!(
                lane,
                delivery_id = receipt.delivery_id,
                "Shutdown while waiting for term registry, leaving event for redelivery"
            );
            return self.finish(
                lane,
                EventReport {
                    state: EventState::Received,
                    decisions: 0,
                    fault: Some(EngineFault::RegistryUnavailable),
                },
            );
        };
        let terms = snapshot.applicable_terms(&update.scope_keys(), update.source_timestamp);
        debug!(
            lane,
            instrument = %update.instrument,
            sequence = update.sequence,
            snapshot_version = snapshot.version(),
            terms = terms.len(),
            "Event resolved"
        );

        // Resolved → Evaluated
        let ctx = EvaluationContext::at(Utc::now()).out_of_order(out_of_order);
        let evaluation = evaluate(update, terms.iter().map(|term| term.as_ref()), ctx);

        for skipped in &evaluation.skipped {
            debug!(
                lane,
                term_id = %skipped.term_id,
                instrument = %update.instrument,
                sequence = update.sequence,
                reason = %skipped.reason,
                "Term skipped"
            );
        }
        for defect in &evaluation.defects {
            let fault = EngineFault::RuleEvaluationDefect {
                term_id: defect.term_id.clone(),
                term_version: defect.term_version,
                error: defect.error.clone(),
            };
            warn!(
                lane,
                instrument = %update.instrument,
                sequence = update.sequence,
                error = %fault,
                "Rule defect, term skipped for this event"
            );
            self.health.record_fault(&fault);
        }

        let decisions = evaluation.decisions.len();
        self.health.record_decisions(decisions);

        if evaluation.decisions.is_empty() {
            let state = if evaluation.all_skipped() {
                EventState::Skipped
            } else {
                EventState::Acknowledged
            };
            return self.acknowledge(lane, receipt, update, state, 0).await;
        }

        // Evaluated → Published
        match self.publish_all(&evaluation.decisions).await {
            Ok(()) => {
                self.acknowledge(lane, receipt, update, EventState::Acknowledged, decisions)
                    .await
            },
            Err(fault) => {
                error!(
                    lane,
                    delivery_id = receipt.delivery_id,
                    instrument = %update.instrument,
                    sequence = update.sequence,
                    error = %fault,
                    "Event failed, routing to dead letter"
                );
                self.health.record_fault(&fault);
                let reason = fault.to_string();
                if let Err(e) = self.settle(|| self.inbound.dead_letter(receipt, &reason)).await {
                    error!(lane, delivery_id = receipt.delivery_id, error = %e, "Dead letter failed");
                }
                self.fail(lane, receipt, Some(update.sequence), EventState::Failed, fault, decisions)
            },
        }
    }

    /// Handle a delivery whose payload could not be decoded.
    pub async fn handle_malformed(
        &self,
        lane: usize,
        receipt: &DeliveryReceipt,
        error: &DomainError,
    ) -> EventReport {
        let fault = EngineFault::MalformedEvent(error.to_string());
        warn!(
            lane,
            delivery_id = receipt.delivery_id,
            partition_key = %receipt.partition_key,
            policy = %self.settings.malformed_policy,
            error = %fault,
            "Malformed delivery"
        );
        self.health.record_fault(&fault);

        match self.settings.malformed_policy {
            MalformedPolicy::SkipAck => match self.settle(|| self.inbound.acknowledge(receipt)).await {
                Ok(()) => self.finish(
                    lane,
                    EventReport { state: EventState::Skipped, decisions: 0, fault: Some(fault) },
                ),
                Err(e) => self.settle_failed(lane, receipt, None, EventState::Received, e, 0),
            },
            MalformedPolicy::DeadLetter => {
                let reason = fault.to_string();
                match self.settle(|| self.inbound.dead_letter(receipt, &reason)).await {
                    Ok(()) => self.fail(lane, receipt, None, EventState::DeadLettered, fault, 0),
                    Err(e) => self.settle_failed(lane, receipt, None, EventState::Received, e, 0),
                }
            },
        }
    }

    async fn resolve_snapshot(&self) -> Option<Arc<TermSnapshot>> {
        if let Some(snapshot) = self.registry.snapshot() {
            return Some(snapshot);
        }
        if self.settings.allow_empty_registry {
            return Some(Arc::new(TermSnapshot::empty()));
        }

        info!("Waiting for first term registry snapshot");
        tokio::select! {
            snapshot = self.registry.wait_ready() => Some(snapshot),
            _ = self.shutdown.cancelled() => None,
        }
    }

    /// Publish in rounds; each round retries only what is still unpublished.
    async fn publish_all(&self, decisions: &[ViolationDecision]) -> Result<(), EngineFault> {
        let rounds = self.settings.publish_rounds.max(1);
        let mut backoff = self.settings.backoff.start();
        let mut pending: Vec<&ViolationDecision> = decisions.iter().collect();
        let mut abandoned = 0usize;
        let mut last_error = String::new();

        for round in 1..=rounds {
            let mut retry = Vec::new();

            for decision in std::mem::take(&mut pending) {
                match self.publisher.publish(decision).await {
                    PublishOutcome::Published { receipt, .. } => {
                        self.health.record_published(receipt.duplicate);
                    },
                    PublishOutcome::AlreadyPublished => self.health.record_suppressed(),
                    PublishOutcome::Failed { error, .. } => {
                        last_error = error.to_string();
                        if error.is_retryable() {
                            retry.push(decision);
                        } else {
                            abandoned += 1;
                        }
                    },
                }
            }

            pending = retry;
            if pending.is_empty() {
                break;
            }
            if round < rounds {
                let delay = backoff.next_delay();
                warn!(
                    round,
                    unpublished = pending.len(),
                    delay_ms = delay.as_millis() as u64,
                    "Publish round incomplete, retrying unpublished alerts"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let unpublished = pending.len() + abandoned;
        if unpublished == 0 {
            Ok(())
        } else {
            Err(EngineFault::PublishBudgetExhausted {
                unpublished,
                total: decisions.len(),
                last_error,
            })
        }
    }

    async fn acknowledge(
        &self,
        lane: usize,
        receipt: &DeliveryReceipt,
        update: &MarketDataUpdate,
        state: EventState,
        decisions: usize,
    ) -> EventReport {
        match self.settle(|| self.inbound.acknowledge(receipt)).await {
            Ok(()) => {
                debug!(
                    lane,
                    delivery_id = receipt.delivery_id,
                    instrument = %update.instrument,
                    sequence = update.sequence,
                    decisions,
                    %state,
                    "Event settled"
                );
                self.finish(lane, EventReport { state, decisions, fault: None })
            },
            Err(e) => {
                let reached = if decisions > 0 {
                    EventState::Published
                } else {
                    EventState::Evaluated
                };
                self.settle_failed(lane, receipt, Some(update.sequence), reached, e, decisions)
            },
        }
    }

    /// Run a broker settle call, retrying transient failures.
    async fn settle<F, Fut>(&self, mut call: F) -> Result<(), ExecError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ExecError>>,
    {
        let attempts = self.settings.settle_attempts.max(1);
        let mut backoff = self.settings.backoff.start();
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = backoff.next_delay();
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Broker call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// The broker could not be told; the delivery stays unsettled for redelivery.
    fn settle_failed(
        &self,
        lane: usize,
        receipt: &DeliveryReceipt,
        sequence: Option<u64>,
        reached: EventState,
        error: ExecError,
        decisions: usize,
    ) -> EventReport {
        error!(
            lane,
            delivery_id = receipt.delivery_id,
            error = %error,
            "Could not settle delivery, leaving it for redelivery"
        );
        self.fail(lane, receipt, sequence, reached, EngineFault::TransientIo(error.to_string()), decisions)
    }

    fn fail(
        &self,
        lane: usize,
        receipt: &DeliveryReceipt,
        sequence: Option<u64>,
        state: EventState,
        fault: EngineFault,
        decisions: usize,
    ) -> EventReport {
        self.health.record_failure(FailureRecord {
            at: Utc::now(),
            lane,
            delivery_id: receipt.delivery_id,
            partition_key: receipt.partition_key.clone(),
            sequence,
            state,
            kind: fault.kind(),
            reason: fault.to_string(),
        });
        self.finish(lane, EventReport { state, decisions, fault: Some(fault) })
    }

    fn finish(&self, lane: usize, report: EventReport) -> EventReport {
        self.health.record_event(lane, report.state);
        report
    }

    /// Get the publisher.
    pub fn publisher(&self) -> &AlertPublisher<S> {
        &self.publisher
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use chrono::{DateTime, Duration, TimeZone};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use termwatch_domain::{
        ComparisonOp, DedupKey, FieldValue, InstrumentKey, RuleSpec, ScopeKey, Term,
        TermChangeEvent, TermId, TermStatus,
    };
    use termwatch_exec::{
        PublishLedger, PublisherConfig, StubAlertSink, StubFailure, StubInbound,
    };

    struct Harness {
        pipeline: Pipeline<StubInbound, StubAlertSink>,
        registry: Arc<TermRegistry>,
        inbound: Arc<StubInbound>,
        sink: Arc<StubAlertSink>,
        health: Arc<HealthState>,
    }

    fn harness(settings: PipelineSettings) -> Harness {
        let registry = Arc::new(TermRegistry::new());
        let inbound = Arc::new(StubInbound::new(16));
        let sink = Arc::new(StubAlertSink::new());
        let shutdown = CancellationToken::new();
        let health = Arc::new(
            HealthState::new(Environment::Test, registry.clone(), 1, shutdown.clone()).unwrap(),
        );
        let publisher = AlertPublisher::new(
            sink.clone(),
            Arc::new(PublishLedger::new(100)),
            PublisherConfig {
                max_attempts: 2,
                attempt_timeout: std::time::Duration::from_millis(100),
                backoff: backoff(),
            },
        );
        let pipeline = Pipeline::new(
            registry.clone(),
            publisher,
            inbound.clone(),
            health.clone(),
            settings,
            shutdown,
        );
        Harness { pipeline, registry, inbound, sink, health }
    }

    fn backoff() -> BackoffPolicy {
        BackoffPolicy {
            base: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
            jitter_factor: 0.0,
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            publish_rounds: 2,
            malformed_policy: MalformedPolicy::DeadLetter,
            allow_empty_registry: false,
            settle_attempts: 3,
            backoff: backoff(),
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn rate_cap(id: &str, limit: rust_decimal::Decimal) -> Term {
        Term::new(
            TermId::new(id).unwrap(),
            ScopeKey::instrument("USD-SWAP"),
            RuleSpec::Threshold {
                field: "rate".to_string(),
                operator: ComparisonOp::Gt,
                limit,
                precision: 2,
            },
            ts() - Duration::days(1),
        )
    }

    fn update(seq: u64, rate: Option<rust_decimal::Decimal>) -> MarketDataUpdate {
        let mut fields = BTreeMap::new();
        match rate {
            Some(rate) => fields.insert("rate".to_string(), FieldValue::Number(rate)),
            None => fields.insert("bid".to_string(), FieldValue::Number(dec!(1))),
        };
        MarketDataUpdate::new(InstrumentKey::new("USD-SWAP").unwrap(), fields, ts(), seq)
    }

    fn receipt(id: u64) -> DeliveryReceipt {
        DeliveryReceipt { delivery_id: id, partition_key: "USD-SWAP".to_string() }
    }

    #[tokio::test]
    async fn test_breach_is_published_then_acknowledged() {
        let h = harness(settings());
        h.registry.bootstrap(vec![rate_cap("RATE_CAP_5PCT", dec!(5.0))]);

        let report = h.pipeline.process(0, &receipt(1), &update(42, Some(dec!(5.01))), false).await;

        assert_eq!(report.state, EventState::Acknowledged);
        assert_eq!(report.decisions, 1);
        assert_eq!(h.sink.alerts().len(), 1);
        assert_eq!(h.inbound.acked(), vec![receipt(1)]);
    }

    #[tokio::test]
    async fn test_no_breach_is_acknowledged_without_alerts() {
        let h = harness(settings());
        h.registry.bootstrap(vec![rate_cap("RATE_CAP_5PCT", dec!(5.0))]);

        let report = h.pipeline.process(0, &receipt(1), &update(42, Some(dec!(5.0))), false).await;

        assert_eq!(report.state, EventState::Acknowledged);
        assert!(h.sink.alerts().is_empty());
        assert_eq!(h.inbound.acked().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_field_marks_event_skipped() {
        let h = harness(settings());
        h.registry.bootstrap(vec![rate_cap("RATE_CAP_5PCT", dec!(5.0))]);

        let report = h.pipeline.process(0, &receipt(1), &update(42, None), false).await;

        assert_eq!(report.state, EventState::Skipped);
        assert_eq!(h.inbound.acked().len(), 1);
        assert_eq!(h.health.report().counters.skipped, 1);
    }

    #[tokio::test]
    async fn test_suspended_term_stops_firing() {
        let h = harness(settings());
        let term = rate_cap("RATE_CAP_5PCT", dec!(5.0));
        h.registry.bootstrap(vec![term.clone()]);

        h.pipeline.process(0, &receipt(1), &update(1, Some(dec!(6))), false).await;
        let suspended = term.transition(TermStatus::Suspended).unwrap();
        h.registry.apply_change(TermChangeEvent::from(&suspended)).unwrap();
        h.pipeline.process(0, &receipt(2), &update(2, Some(dec!(6))), false).await;

        let alerts = h.sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].decision.sequence(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_fails_and_dead_letters() {
        let h = harness(settings());
        h.registry.bootstrap(vec![rate_cap("RATE_CAP_5PCT", dec!(5.0))]);
        // 2 attempts x 2 rounds
        h.sink.fail_transient(4);

        let report = h.pipeline.process(0, &receipt(1), &update(42, Some(dec!(5.01))), false).await;

        assert_eq!(report.state, EventState::Failed);
        assert!(matches!(
            report.fault,
            Some(EngineFault::PublishBudgetExhausted { unpublished: 1, total: 1, .. })
        ));
        assert!(h.inbound.acked().is_empty());
        assert_eq!(h.inbound.dead_lettered().len(), 1);

        let health = h.health.report();
        assert_eq!(health.counters.failed, 1);
        assert_eq!(health.counters.publish_budget_exhausted, 1);
        assert_eq!(health.recent_failures[0].kind, "publish_budget_exhausted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_sink_rejection_fails_without_retry() {
        let h = harness(settings());
        h.registry.bootstrap(vec![rate_cap("RATE_CAP_5PCT", dec!(5.0))]);
        h.sink.script([StubFailure::Fatal]);

        let event = update(42, Some(dec!(5.01)));
        let report = h.pipeline.process(0, &receipt(1), &event, false).await;

        assert_eq!(report.state, EventState::Failed);
        assert!(matches!(
            report.fault,
            Some(EngineFault::PublishBudgetExhausted { unpublished: 1, total: 1, .. })
        ));
        // Fatal stops the decision: no further attempts, no second round
        assert_eq!(h.sink.send_count(), 1);
        assert!(h.inbound.acked().is_empty());
        assert_eq!(h.inbound.dead_lettered().len(), 1);
        assert_eq!(h.health.report().recent_failures[0].state, EventState::Failed);

        let key = DedupKey::compute(
            &TermId::new("RATE_CAP_5PCT").unwrap(),
            1,
            &InstrumentKey::new("USD-SWAP").unwrap(),
            42,
        );
        assert!(!h.pipeline.publisher().ledger().is_published(&key).unwrap());

        // Claim was released, so a redelivery publishes
        let retry = h.pipeline.process(0, &receipt(2), &event, false).await;

        assert_eq!(retry.state, EventState::Acknowledged);
        assert_eq!(h.sink.alerts().len(), 1);
        assert_eq!(h.inbound.acked(), vec![receipt(2)]);
        assert!(h.pipeline.publisher().ledger().is_published(&key).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_round_publishes_only_unpublished_subset() {
        let h = harness(settings());
        h.registry.bootstrap(vec![
            rate_cap("A_CAP", dec!(5.0)),
            rate_cap("B_CAP", dec!(5.0)),
        ]);
        // A succeeds; B fails both attempts of round one, succeeds in round two
        h.sink.script([
            StubFailure::Transient,
            StubFailure::Transient,
        ]);

        let report = h.pipeline.process(0, &receipt(1), &update(42, Some(dec!(6))), false).await;

        assert_eq!(report.state, EventState::Acknowledged);
        let alerts = h.sink.alerts();
        assert_eq!(alerts.len(), 2);
        // A's first send hit the scripted failures, so B went out first
        assert_eq!(h.sink.send_count(), 4);
    }

    #[tokio::test]
    async fn test_redelivery_is_suppressed_and_acknowledged() {
        let h = harness(settings());
        h.registry.bootstrap(vec![rate_cap("RATE_CAP_5PCT", dec!(5.0))]);

        h.pipeline.process(0, &receipt(1), &update(42, Some(dec!(5.01))), false).await;
        let report = h.pipeline.process(0, &receipt(2), &update(42, Some(dec!(5.01))), false).await;

        assert_eq!(report.state, EventState::Acknowledged);
        assert_eq!(h.sink.alerts().len(), 1);
        assert_eq!(h.sink.send_count(), 1);
        assert_eq!(h.health.report().counters.duplicates_suppressed, 1);
    }

    #[tokio::test]
    async fn test_malformed_dead_letter_policy() {
        let h = harness(settings());
        let error = MarketDataUpdate::decode(b"{oops").unwrap_err();

        let report = h.pipeline.handle_malformed(0, &receipt(9), &error).await;

        assert_eq!(report.state, EventState::DeadLettered);
        assert_eq!(h.inbound.dead_lettered().len(), 1);
        assert_eq!(h.health.report().recent_failures.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_skip_ack_policy() {
        let h = harness(PipelineSettings { malformed_policy: MalformedPolicy::SkipAck, ..settings() });
        let error = MarketDataUpdate::decode(b"{oops").unwrap_err();

        let report = h.pipeline.handle_malformed(0, &receipt(9), &error).await;

        assert_eq!(report.state, EventState::Skipped);
        assert_eq!(h.inbound.acked(), vec![receipt(9)]);
        assert_eq!(h.health.report().counters.malformed_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_ack_failure_is_retried() {
        let h = harness(settings());
        h.registry.bootstrap(Vec::new());
        h.inbound.fail_next_acks(2);

        let report = h.pipeline.process(0, &receipt(1), &update(1, Some(dec!(1))), false).await;

        assert_eq!(report.state, EventState::Acknowledged);
        assert_eq!(h.inbound.acked().len(), 1);
    }

    #[tokio::test]
    async fn test_waits_for_registry_before_evaluating() {
        let h = Arc::new(harness(settings()));
        let task = {
            let h = h.clone();
            tokio::spawn(async move {
                h.pipeline.process(0, &receipt(1), &update(42, Some(dec!(5.01))), false).await
            })
        };

        tokio::task::yield_now().await;
        assert!(h.inbound.acked().is_empty());

        h.registry.bootstrap(vec![rate_cap("RATE_CAP_5PCT", dec!(5.0))]);
        let report = task.await.unwrap();

        assert_eq!(report.state, EventState::Acknowledged);
        assert_eq!(h.sink.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_allow_empty_registry_acknowledges_immediately() {
        let h = harness(PipelineSettings { allow_empty_registry: true, ..settings() });

        let report = h.pipeline.process(0, &receipt(1), &update(42, Some(dec!(5.01))), false).await;

        assert_eq!(report.state, EventState::Acknowledged);
        assert!(h.sink.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_flag_reaches_alert() {
        let h = harness(settings());
        h.registry.bootstrap(vec![rate_cap("RATE_CAP_5PCT", dec!(5.0))]);

        h.pipeline.process(0, &receipt(1), &update(3, Some(dec!(6))), true).await;

        assert!(h.sink.alerts()[0].decision.out_of_order);
        assert_eq!(h.health.report().counters.out_of_order_events, 1);
    }
}
