//! Termwatch Execution Layer
//!
//! Broker ports and idempotent alert publication.
//!
//! # Architecture
//!
//! ```text
//! ViolationDecision → AlertPublisher → PublishLedger → AlertSink → SinkReceipt
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the inbound market data stream and the alert sink
//! - **Publish Ledger**: Remembers published dedup keys (effectively-once)
//! - **Alert Publisher**: Timeout, retry with backoff, ledger bookkeeping
//! - **Stub**: In-memory broker implementations for tests and development
//!
//! # Example
//!
//! ```rust,ignore
//! use termwatch_exec::{AlertPublisher, PublishLedger, PublisherConfig, StubAlertSink};
//! use std::sync::Arc;
//!
//! let sink = Arc::new(StubAlertSink::new());
//! let ledger = Arc::new(PublishLedger::new(100_000));
//! let publisher = AlertPublisher::new(sink, ledger, PublisherConfig::default());
//!
//! let outcome = publisher.publish(&decision).await;
//! ```

#![warn(clippy::all)]

pub mod backoff;
pub mod error;
pub mod ledger;
pub mod ports;
pub mod publisher;
pub mod stub;

// Re-exports for convenience
pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use error::{ExecError, ExecResult};
pub use ledger::{LedgerClaim, PublishLedger, DEFAULT_RETENTION};
pub use ports::{
    AlertSink, DeliveryReceipt, InboundDelivery, InboundSource, SinkError, SinkReceipt,
};
pub use publisher::{AlertPublisher, PublishOutcome, PublisherConfig};
pub use stub::{StubAlertSink, StubFailure, StubInbound};
