//! Stub implementations for testing.
//!
//! These implementations simulate the inbound market data stream and the
//! outbound alert broker without a real broker connection.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch};

use termwatch_domain::{DedupKey, MarketDataUpdate, ViolationAlert};

use crate::error::ExecError;
use crate::ports::{
    AlertSink, DeliveryReceipt, InboundDelivery, InboundSource, SinkError, SinkReceipt,
};

// =============================================================================
// Stub Inbound
// =============================================================================

/// Stub inbound stream for testing.
///
/// Deliveries are injected with `push_*`; acknowledgements and dead letters
/// are recorded for inspection.
pub struct StubInbound {
    sender: Mutex<Option<mpsc::Sender<InboundDelivery>>>,
    receiver: Mutex<Option<mpsc::Receiver<InboundDelivery>>>,
    next_delivery_id: AtomicU64,
    acked: Mutex<Vec<DeliveryReceipt>>,
    dead_lettered: Mutex<Vec<(DeliveryReceipt, String)>>,
    /// Number of upcoming acknowledgements that fail transiently
    ack_failures: AtomicU32,
    /// Count of settled (acked or dead-lettered) deliveries
    settled: watch::Sender<usize>,
}

impl StubInbound {
    /// Create a stub with room for `capacity` undelivered messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (settled, _) = watch::channel(0);
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            next_delivery_id: AtomicU64::new(1),
            acked: Mutex::new(Vec::new()),
            dead_lettered: Mutex::new(Vec::new()),
            ack_failures: AtomicU32::new(0),
            settled,
        }
    }

    /// Inject an update keyed by its instrument.
    pub async fn push_update(&self, update: &MarketDataUpdate) -> Result<DeliveryReceipt, ExecError> {
        let payload = serde_json::to_vec(update)
            .map_err(|e| ExecError::Source(format!("encode update: {}", e)))?;
        self.push_raw(update.instrument.as_str(), payload).await
    }

    /// Inject a raw payload under `partition_key`.
    pub async fn push_raw(
        &self,
        partition_key: &str,
        payload: Vec<u8>,
    ) -> Result<DeliveryReceipt, ExecError> {
        let sender = self
            .sender
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ExecError::Source("stream closed".to_string()))?;

        let receipt = DeliveryReceipt {
            delivery_id: self.next_delivery_id.fetch_add(1, Ordering::SeqCst),
            partition_key: partition_key.to_string(),
        };
        sender
            .send(InboundDelivery { receipt: receipt.clone(), payload })
            .await
            .map_err(|_| ExecError::Source("subscriber dropped".to_string()))?;
        Ok(receipt)
    }

    /// End the stream once queued deliveries are drained.
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }

    /// Make the next `count` acknowledgements fail transiently.
    pub fn fail_next_acks(&self, count: u32) {
        self.ack_failures.store(count, Ordering::SeqCst);
    }

    /// Acknowledged deliveries, in acknowledgement order.
    pub fn acked(&self) -> Vec<DeliveryReceipt> {
        self.acked.lock().unwrap().clone()
    }

    /// Dead-lettered deliveries with their reasons.
    pub fn dead_lettered(&self) -> Vec<(DeliveryReceipt, String)> {
        self.dead_lettered.lock().unwrap().clone()
    }

    /// Number of acknowledged or dead-lettered deliveries.
    pub fn settled_count(&self) -> usize {
        *self.settled.borrow()
    }

    /// Wait until at least `count` deliveries are settled.
    pub async fn wait_settled(&self, count: usize) {
        let mut settled = self.settled.subscribe();
        let _ = settled.wait_for(|settled| *settled >= count).await;
    }

    fn mark_settled(&self) {
        self.settled.send_modify(|settled| *settled += 1);
    }
}

impl Default for StubInbound {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl InboundSource for StubInbound {
    async fn subscribe(&self) -> Result<mpsc::Receiver<InboundDelivery>, ExecError> {
        self.receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ExecError::Source("already subscribed".to_string()))
    }

    async fn acknowledge(&self, receipt: &DeliveryReceipt) -> Result<(), ExecError> {
        let failing = self
            .ack_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ExecError::Transient("simulated ack failure".to_string()));
        }

        self.acked.lock().unwrap().push(receipt.clone());
        self.mark_settled();
        Ok(())
    }

    async fn dead_letter(&self, receipt: &DeliveryReceipt, reason: &str) -> Result<(), ExecError> {
        self.dead_lettered.lock().unwrap().push((receipt.clone(), reason.to_string()));
        self.mark_settled();
        Ok(())
    }
}

// =============================================================================
// Stub Alert Sink
// =============================================================================

/// Scripted behavior for one `send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubFailure {
    /// Fail with a transient error
    Transient,
    /// Fail with a fatal error
    Fatal,
    /// Sleep before accepting (exercises timeouts)
    Delay(Duration),
}

/// Stub alert broker for testing.
///
/// Collapses deliveries that repeat an idempotency key, like a broker with
/// idempotent producers would.
pub struct StubAlertSink {
    alerts: Mutex<Vec<ViolationAlert>>,
    seen: Mutex<HashSet<DedupKey>>,
    script: Mutex<VecDeque<StubFailure>>,
    latency: Mutex<Duration>,
    sends: AtomicU64,
    duplicates: AtomicU64,
}

impl StubAlertSink {
    /// Create an always-accepting sink.
    pub fn new() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
            script: Mutex::new(VecDeque::new()),
            latency: Mutex::new(Duration::ZERO),
            sends: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Queue behaviors for the next `send` calls, one per call.
    pub fn script(&self, steps: impl IntoIterator<Item = StubFailure>) {
        self.script.lock().unwrap().extend(steps);
    }

    /// Fail the next `count` sends transiently.
    pub fn fail_transient(&self, count: usize) {
        self.script(std::iter::repeat(StubFailure::Transient).take(count));
    }

    /// Add latency to every accepted send.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Unique alerts accepted, in acceptance order.
    pub fn alerts(&self) -> Vec<ViolationAlert> {
        self.alerts.lock().unwrap().clone()
    }

    /// Number of `send` calls, including failed ones.
    pub fn send_count(&self) -> u64 {
        self.sends.load(Ordering::SeqCst)
    }

    /// Number of accepted sends collapsed as duplicates.
    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::SeqCst)
    }
}

impl Default for StubAlertSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertSink for StubAlertSink {
    async fn send(&self, alert: &ViolationAlert) -> Result<SinkReceipt, SinkError> {
        self.sends.fetch_add(1, Ordering::SeqCst);

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(StubFailure::Transient) => {
                return Err(SinkError::Transient("simulated broker hiccup".to_string()))
            },
            Some(StubFailure::Fatal) => {
                return Err(SinkError::Fatal("simulated rejection".to_string()))
            },
            Some(StubFailure::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {},
        }

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let fresh = self.seen.lock().unwrap().insert(alert.idempotency_key.clone());
        if fresh {
            self.alerts.lock().unwrap().push(alert.clone());
        } else {
            self.duplicates.fetch_add(1, Ordering::SeqCst);
        }

        Ok(SinkReceipt { duplicate: !fresh, accepted_at: Utc::now() })
    }
}

// =============================================================================
// Tests
// =============================================================================
