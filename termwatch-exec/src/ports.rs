//! Broker port definitions.
//!
//! Ports define the interfaces for the inbound market data stream and the
//! outbound alert sink. Adapters implement them for a concrete broker;
//! `stub` implements them in memory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use termwatch_domain::{MarketDataUpdate, ViolationAlert};

use crate::error::ExecError;

// =============================================================================
// Inbound Source
// =============================================================================

/// Handle identifying one inbound delivery for acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Broker-assigned delivery id (offset, delivery tag, ...)
    pub delivery_id: u64,
    /// Message key; the instrument key unless the feed partitions differently
    pub partition_key: String,
}

/// One raw message from the inbound market data stream.
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    /// Acknowledgement handle
    pub receipt: DeliveryReceipt,
    /// Encoded [`MarketDataUpdate`] (JSON)
    pub payload: Vec<u8>,
}

impl InboundDelivery {
    /// Decode the payload.
    pub fn decode(&self) -> Result<MarketDataUpdate, termwatch_domain::DomainError> {
        MarketDataUpdate::decode(&self.payload)
    }
}

/// Port for the inbound market data stream.
///
/// Implementations:
/// - `StubInbound` - For testing (manual injection, records acks)
#[async_trait]
pub trait InboundSource: Send + Sync {
    /// Subscribe to deliveries. The channel closes when the stream ends.
    async fn subscribe(&self) -> Result<mpsc::Receiver<InboundDelivery>, ExecError>;

    /// Acknowledge (commit) a delivery. Only called once every alert the
    /// delivery produced has been published.
    async fn acknowledge(&self, receipt: &DeliveryReceipt) -> Result<(), ExecError>;

    /// Route a delivery to the dead-letter path instead of acknowledging it.
    async fn dead_letter(&self, receipt: &DeliveryReceipt, reason: &str) -> Result<(), ExecError>;
}

// =============================================================================
// Alert Sink
// =============================================================================

/// Failure reported by an alert sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Retry may succeed (broker busy, connection reset, ...)
    #[error("transient: {0}")]
    Transient(String),
    /// Retry will not succeed (message rejected, topic missing, ...)
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Acknowledgement from the sink for one alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkReceipt {
    /// The broker recognized the idempotency key and collapsed the delivery
    pub duplicate: bool,
    /// When the sink accepted the alert
    pub accepted_at: DateTime<Utc>,
}

/// Port for the outbound alert broker.
///
/// The alert's `idempotency_key` must be used as the broker message's
/// idempotency key so downstream consumers can collapse duplicates.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert. May block on broker backpressure.
    async fn send(&self, alert: &ViolationAlert) -> Result<SinkReceipt, SinkError>;
}

// =============================================================================
// Tests
// =============================================================================
