//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use termwatch_exec::{BackoffPolicy, PublisherConfig, DEFAULT_RETENTION};

use crate::error::{DaemonError, DaemonResult};

/// Upper bound on the lane pool.
pub const MAX_LANE_COUNT: usize = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Lane pool and resequencing
    pub lanes: LaneConfig,

    /// Alert publication
    pub publish: PublishConfig,

    /// Evaluation engine policies
    pub engine: EngineConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Lane pool configuration.
#[derive(Debug, Clone)]
pub struct LaneConfig {
    /// Number of sequential lanes
    pub count: usize,
    /// Bounded queue size per lane
    pub capacity: usize,
    /// Out-of-order events buffered per key before a gap is abandoned
    pub resequence_window: usize,
    /// Longest time an out-of-order event waits for its predecessor
    pub resequence_hold: Duration,
    /// Quiet period after which a key's resequencing state is dropped
    pub resequence_idle: Duration,
}

/// Alert publication configuration.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Upper bound on one sink `send`
    pub timeout: Duration,
    /// Attempts per publication, including the first
    pub max_attempts: u32,
    /// Rounds over the unpublished subset of an event's decisions
    pub rounds: u32,
    /// First retry delay
    pub backoff_base: Duration,
    /// Largest retry delay
    pub backoff_max: Duration,
    /// Published dedup keys remembered
    pub dedup_retention: usize,
}

/// Evaluation engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// What to do with undecodable deliveries
    pub malformed_policy: MalformedPolicy,
    /// Evaluate against an empty term set instead of waiting for the registry
    pub allow_empty_registry: bool,
}

/// Handling of deliveries that cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedPolicy {
    /// Route to the dead-letter path
    DeadLetter,
    /// Acknowledge and move on
    SkipAck,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Ok(Self {
            api: Self::load_api_config()?,
            lanes: Self::load_lane_config()?,
            publish: Self::load_publish_config()?,
            engine: Self::load_engine_config()?,
            environment: Self::load_environment()?,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            lanes: LaneConfig {
                count: 4,
                capacity: 64,
                resequence_window: 8,
                resequence_hold: Duration::from_millis(50),
                resequence_idle: Duration::from_secs(5),
            },
            publish: PublishConfig {
                timeout: Duration::from_millis(200),
                max_attempts: 3,
                rounds: 2,
                backoff_base: Duration::from_millis(5),
                backoff_max: Duration::from_millis(20),
                dedup_retention: 1_000,
            },
            engine: EngineConfig {
                malformed_policy: MalformedPolicy::DeadLetter,
                allow_empty_registry: false,
            },
            environment: Environment::Test,
        }
    }

    /// Publisher settings derived from this configuration.
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            max_attempts: self.publish.max_attempts,
            attempt_timeout: self.publish.timeout,
            backoff: self.backoff_policy(),
        }
    }

    /// Retry delays for publish rounds and acknowledgements.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.publish.backoff_base,
            max_delay: self.publish.backoff_max,
            jitter_factor: 0.1,
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("TERMWATCH_ENV").unwrap_or_else(|_| "development".to_string());
        env_str.parse()
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("TERMWATCH_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = load_env("TERMWATCH_API_PORT", 8080u16)?;

        Ok(ApiConfig { host, port })
    }

    fn load_lane_config() -> DaemonResult<LaneConfig> {
        Ok(LaneConfig {
            count: load_env("TERMWATCH_LANE_COUNT", 8usize)?,
            capacity: load_env("TERMWATCH_LANE_CAPACITY", 256usize)?,
            resequence_window: load_env("TERMWATCH_RESEQUENCE_WINDOW", 64usize)?,
            resequence_hold: load_millis("TERMWATCH_RESEQUENCE_HOLD_MS", 500)?,
            resequence_idle: load_millis("TERMWATCH_RESEQUENCE_IDLE_MS", 300_000)?,
        })
    }

    fn load_publish_config() -> DaemonResult<PublishConfig> {
        Ok(PublishConfig {
            timeout: load_millis("TERMWATCH_PUBLISH_TIMEOUT_MS", 2_000)?,
            max_attempts: load_env("TERMWATCH_PUBLISH_MAX_ATTEMPTS", 5u32)?,
            rounds: load_env("TERMWATCH_PUBLISH_ROUNDS", 3u32)?,
            backoff_base: load_millis("TERMWATCH_BACKOFF_BASE_MS", 100)?,
            backoff_max: load_millis("TERMWATCH_BACKOFF_MAX_MS", 5_000)?,
            dedup_retention: load_env("TERMWATCH_DEDUP_RETENTION", DEFAULT_RETENTION)?,
        })
    }

    fn load_engine_config() -> DaemonResult<EngineConfig> {
        Ok(EngineConfig {
            malformed_policy: load_env("TERMWATCH_MALFORMED_POLICY", MalformedPolicy::DeadLetter)?,
            allow_empty_registry: load_env("TERMWATCH_ALLOW_EMPTY_REGISTRY", false)?,
        })
    }
}

impl LaneConfig {
    /// Check the lane pool can be allocated.
    pub fn validate(&self) -> DaemonResult<()> {
        if self.count == 0 || self.count > MAX_LANE_COUNT {
            return Err(DaemonError::LaneAllocation {
                requested: self.count,
                max: MAX_LANE_COUNT,
            });
        }
        if self.capacity == 0 {
            return Err(DaemonError::Config("Lane capacity must be at least 1".to_string()));
        }
        if self.resequence_idle.is_zero() {
            return Err(DaemonError::Config("Resequence idle window must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn load_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
    match env::var(key) {
        Ok(val) => parse_value(key, &val),
        Err(_) => Ok(default),
    }
}

fn load_millis(key: &str, default_ms: u64) -> DaemonResult<Duration> {
    load_env(key, default_ms).map(Duration::from_millis)
}

fn parse_value<T: FromStr>(key: &str, val: &str) -> DaemonResult<T> {
    val.trim()
        .parse()
        .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val)))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            lanes: LaneConfig {
                count: 8,
                capacity: 256,
                resequence_window: 64,
                resequence_hold: Duration::from_millis(500),
                resequence_idle: Duration::from_secs(300),
            },
            publish: PublishConfig {
                timeout: Duration::from_secs(2),
                max_attempts: 5,
                rounds: 3,
                backoff_base: Duration::from_millis(100),
                backoff_max: Duration::from_secs(5),
                dedup_retention: DEFAULT_RETENTION,
            },
            engine: EngineConfig {
                malformed_policy: MalformedPolicy::DeadLetter,
                allow_empty_registry: false,
            },
            environment: Environment::Development,
        }
    }
}

impl FromStr for Environment {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid TERMWATCH_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for MalformedPolicy {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "dead-letter" => Ok(MalformedPolicy::DeadLetter),
            "skip-ack" => Ok(MalformedPolicy::SkipAck),
            other => Err(DaemonError::Config(format!(
                "Invalid malformed policy: {}. Expected: dead-letter, skip-ack",
                other
            ))),
        }
    }
}

impl std::fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedPolicy::DeadLetter => write!(f, "dead-letter"),
            MalformedPolicy::SkipAck => write!(f, "skip-ack"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
