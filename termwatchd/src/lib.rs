//! Termwatch Daemon Library
//!
//! Runtime orchestrator for the term compliance evaluation engine.
//!
//! # Architecture
//!
//! ```text
//! InboundSource → Router → Lane (resequencer) → Pipeline → AlertPublisher → AlertSink
//!                                                  ↑
//!                                            Term Registry
//!                                                  ↑
//!                         TermRepository (bootstrap) + Term Listener (TermChangeFeed)
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Router**: Assigns deliveries to lanes by partition key
//! - **Lane**: Sequential worker with a per-key resequencer
//! - **Pipeline**: Per-event state machine (resolve, evaluate, publish, acknowledge)
//! - **Term Listener**: Applies term changes to the registry
//! - **Health / API**: JSON health report and Prometheus metrics over HTTP
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use termwatchd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod health;
pub mod lane;
pub mod pipeline;
pub mod resequencer;
pub mod router;
pub mod term_listener;

// Re-exports for convenience
pub use config::{
    ApiConfig, Config, EngineConfig, Environment, LaneConfig, MalformedPolicy, PublishConfig,
    MAX_LANE_COUNT,
};
pub use daemon::{Daemon, DaemonHandle};
pub use error::{DaemonError, DaemonResult, EngineFault};
pub use health::{FailureRecord, HealthReport, HealthState};
pub use pipeline::{EventReport, EventState, Pipeline, PipelineSettings};
pub use resequencer::{Released, Resequencer};
pub use router::{lane_for, Router};
