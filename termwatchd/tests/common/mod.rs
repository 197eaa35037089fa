//! Shared fixtures for daemon end-to-end tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use termwatch_domain::{
    ComparisonOp, FieldValue, InstrumentKey, MarketDataUpdate, RuleSpec, ScopeKey, Term, TermId,
};
use termwatch_exec::{StubAlertSink, StubInbound};
use termwatch_registry::{MemoryTermRepository, StubTermFeed, TermRegistry};
use termwatchd::{Config, Daemon, DaemonHandle};
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub inbound: Arc<StubInbound>,
    pub sink: Arc<StubAlertSink>,
    pub feed: Arc<StubTermFeed>,
    pub registry: Arc<TermRegistry>,
    pub shutdown: CancellationToken,
    pub handle: DaemonHandle,
}

impl Harness {
    pub async fn start(config: Config, terms: Vec<Term>) -> Self {
        let inbound = Arc::new(StubInbound::new(1024));
        let sink = Arc::new(StubAlertSink::new());
        let feed = Arc::new(StubTermFeed::new());
        let repository = Arc::new(MemoryTermRepository::with_terms(terms));

        let daemon = Daemon::new(config, inbound.clone(), sink.clone(), repository, feed.clone());
        let registry = daemon.registry();
        let shutdown = CancellationToken::new();
        let handle = daemon.start(shutdown.clone()).await.unwrap();

        Self { inbound, sink, feed, registry, shutdown, handle }
    }

    pub async fn push(&self, update: &MarketDataUpdate) {
        self.inbound.push_update(update).await.unwrap();
    }

    pub async fn settled(&self, count: usize) {
        tokio::time::timeout(WAIT, self.inbound.wait_settled(count))
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "expected {} settled deliveries, got {}",
                    count,
                    self.inbound.settled_count()
                )
            });
    }

    pub async fn registry_version(&self, version: u64) {
        let mut versions = self.registry.subscribe_versions();
        tokio::time::timeout(WAIT, versions.wait_for(|v| *v >= version))
            .await
            .unwrap()
            .unwrap();
    }

    pub async fn stop(self) -> (Arc<StubInbound>, Arc<StubAlertSink>) {
        self.shutdown.cancel();
        tokio::time::timeout(WAIT, self.handle.join()).await.unwrap().unwrap();
        (self.inbound, self.sink)
    }
}

pub fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn threshold(id: &str, instrument: &str, limit: Decimal) -> Term {
    Term::new(
        TermId::new(id).unwrap(),
        ScopeKey::instrument(instrument),
        RuleSpec::Threshold {
            field: "rate".to_string(),
            operator: ComparisonOp::Gt,
            limit,
            precision: 2,
        },
        ts() - chrono::Duration::days(1),
    )
}

pub fn rate_update(instrument: &str, seq: u64, rate: Decimal) -> MarketDataUpdate {
    let mut fields = BTreeMap::new();
    fields.insert("rate".to_string(), FieldValue::Number(rate));
    MarketDataUpdate::new(InstrumentKey::new(instrument).unwrap(), fields, ts(), seq)
}

pub fn field_update(instrument: &str, seq: u64, field: &str, value: Decimal) -> MarketDataUpdate {
    let mut fields = BTreeMap::new();
    fields.insert(field.to_string(), FieldValue::Number(value));
    MarketDataUpdate::new(InstrumentKey::new(instrument).unwrap(), fields, ts(), seq)
}
