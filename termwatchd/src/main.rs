//! Termwatch Daemon
//!
//! Evaluates market data updates against compliance terms and publishes
//! violation alerts.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p termwatchd
//!
//! # Start with custom environment
//! TERMWATCH_ENV=test TERMWATCH_API_PORT=8081 TERMWATCH_LANE_COUNT=16 cargo run -p termwatchd
//! ```
//!
//! # Environment Variables
//!
//! - `TERMWATCH_ENV`: Environment (test, development, production)
//! - `TERMWATCH_API_HOST`: API host (default: 0.0.0.0)
//! - `TERMWATCH_API_PORT`: API port (default: 8080)
//! - `TERMWATCH_LANE_COUNT`: Lanes (default: 8, max: 1024)
//! - `TERMWATCH_LANE_CAPACITY`: Queue size per lane (default: 256)
//! - `TERMWATCH_RESEQUENCE_WINDOW`: Buffered events per key (default: 64)
//! - `TERMWATCH_RESEQUENCE_HOLD_MS`: Max wait for a missing sequence (default: 500)
//! - `TERMWATCH_RESEQUENCE_IDLE_MS`: Forget quiet keys after this long (default: 300000)
//! - `TERMWATCH_PUBLISH_TIMEOUT_MS`: Per-attempt publish timeout (default: 2000)
//! - `TERMWATCH_PUBLISH_MAX_ATTEMPTS`: Attempts per publish (default: 5)
//! - `TERMWATCH_PUBLISH_ROUNDS`: Publish rounds per event (default: 3)
//! - `TERMWATCH_BACKOFF_BASE_MS` / `TERMWATCH_BACKOFF_MAX_MS`: Retry delays (default: 100 / 5000)
//! - `TERMWATCH_MALFORMED_POLICY`: dead-letter | skip-ack (default: dead-letter)
//! - `TERMWATCH_ALLOW_EMPTY_REGISTRY`: Evaluate before terms arrive (default: false)
//! - `TERMWATCH_DEDUP_RETENTION`: Published dedup keys remembered (default: 100000)

use termwatchd::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("termwatchd=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        lanes = config.lanes.count,
        malformed_policy = %config.engine.malformed_policy,
        "Termwatch Daemon"
    );

    // Create and run daemon
    let daemon = Daemon::new_stub(config);
    daemon.run().await?;

    Ok(())
}
