//! Broker endpoint and timing configuration.

use std::time::Duration;

use thiserror::Error;

/// Environment variable holding the broker host.
pub const HOST_ENV: &str = "BROKER_HOST";
/// Environment variable holding the broker port.
pub const PORT_ENV: &str = "BROKER_PORT";

/// Broker configuration, shared by the broker server and the channels
/// that connect to it.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    /// Host part of the endpoint.
    pub host: String,
    /// Port part of the endpoint.
    pub port: u16,
    /// Connection attempts made by `wait_until_ready` before giving up.
    pub connect_attempts: u32,
    /// Pause between connection attempts.
    pub retry_interval: Duration,
    /// How often an idle worker asks its lane for a job.
    pub poll_interval: Duration,
    /// How often lanes promote delayed jobs and check leases.
    pub tick_interval: Duration,
    /// Execution timeout for jobs without their own `timeout_ms`.
    pub default_job_timeout: Duration,
    /// Extra time past the timeout before a lease counts as stalled.
    pub stall_grace: Duration,
    /// Stalls tolerated before a job is failed outright.
    pub max_stalled_count: u32,
    /// Completed and failed jobs kept per lane; the oldest go first.
    pub max_finished_jobs: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            connect_attempts: 10,
            retry_interval: Duration::from_millis(200),
            poll_interval: Duration::from_millis(100),
            tick_interval: Duration::from_secs(1),
            default_job_timeout: Duration::from_secs(300),
            stall_grace: Duration::from_secs(30),
            max_stalled_count: 1,
            max_finished_jobs: 1_000,
        }
    }
}

impl BrokerConfig {
    /// Create a config for the given endpoint with default timings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Read the endpoint from `BROKER_HOST` / `BROKER_PORT`.
    ///
    /// Missing variables fall back to the defaults; a malformed port is an
    /// error. Read once at startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(host) = lookup(HOST_ENV).filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = lookup(PORT_ENV) {
            config.port = port.trim().parse().map_err(|_| ConfigError::InvalidPort(port))?;
        }
        Ok(config)
    }

    /// The `host:port` endpoint string.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Name the broker server actor registers under.
    pub fn broker_name(&self) -> String {
        format!("broker@{}", self.endpoint())
    }

    /// Set the connection retry policy.
    pub fn with_connect_retry(mut self, attempts: u32, interval: Duration) -> Self {
        self.connect_attempts = attempts;
        self.retry_interval = interval;
        self
    }

    /// Set the worker poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the lane housekeeping interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the default job timeout.
    pub fn with_default_job_timeout(mut self, timeout: Duration) -> Self {
        self.default_job_timeout = timeout;
        self
    }

    /// Set how many finished jobs each lane keeps.
    pub fn with_finished_retention(mut self, max_finished_jobs: usize) -> Self {
        self.max_finished_jobs = max_finished_jobs;
        self
    }

    /// Set the stall detection policy.
    pub fn with_stall_policy(mut self, grace: Duration, max_stalled_count: u32) -> Self {
        self.stall_grace = grace;
        self.max_stalled_count = max_stalled_count;
        self
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid broker port: {0:?}")]
    InvalidPort(String),
}
