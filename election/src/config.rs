//! Election node configuration.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Coordination servers dialed when none are given.
pub const DEFAULT_SERVERS: [&str; 3] = ["zoo1:2181", "zoo2:2181", "zoo3:2181"];

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound on how long an attempter trusts its predecessor watch before re-checking.
pub const DEFAULT_ATTEMPTER_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_HEARTBEAT_DIR: &str = "/tmp/election";

pub const DEFAULT_RETENTION_CAPACITY: NonZeroUsize = NonZeroUsize::MIN.saturating_add(9);

/// Delays before each reconnection attempt made by the failover state.
pub const DEFAULT_FAILOVER_BACKOFF: [Duration; 5] = [
    Duration::from_secs(0),
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one coordination server is required")]
    NoServers,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("failover backoff schedule must not be empty")]
    EmptyBackoff,
}

/// Immutable settings of one election node.
///
/// Built with [`Config::new`] and the `with_*` methods, then checked with
/// [`Config::validate`] before being handed to the resource factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    node_name: String,
    servers: Vec<String>,
    dial_timeout: Duration,
    heartbeat_interval: Duration,
    attempter_poll_interval: Duration,
    heartbeat_dir: PathBuf,
    retention_capacity: NonZeroUsize,
    failover_backoff: Vec<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_SERVERS.iter().map(|s| s.to_string()).collect())
    }
}

impl Config {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            node_name: "election".to_string(),
            servers,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            attempter_poll_interval: DEFAULT_ATTEMPTER_POLL_INTERVAL,
            heartbeat_dir: PathBuf::from(DEFAULT_HEARTBEAT_DIR),
            retention_capacity: DEFAULT_RETENTION_CAPACITY,
            failover_backoff: DEFAULT_FAILOVER_BACKOFF.to_vec(),
        }
    }

    /// Name attached to every log event of this node.
    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn with_attempter_poll_interval(mut self, attempter_poll_interval: Duration) -> Self {
        self.attempter_poll_interval = attempter_poll_interval;
        self
    }

    pub fn with_heartbeat_dir(mut self, heartbeat_dir: impl Into<PathBuf>) -> Self {
        self.heartbeat_dir = heartbeat_dir.into();
        self
    }

    pub fn with_retention_capacity(mut self, retention_capacity: NonZeroUsize) -> Self {
        self.retention_capacity = retention_capacity;
        self
    }

    pub fn with_failover_backoff(mut self, failover_backoff: Vec<Duration>) -> Self {
        self.failover_backoff = failover_backoff;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.iter().all(|server| server.trim().is_empty()) {
            return Err(ConfigError::NoServers);
        }
        if self.dial_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("dial timeout"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("heartbeat interval"));
        }
        if self.attempter_poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("attempter poll interval"));
        }
        if self.failover_backoff.is_empty() {
            return Err(ConfigError::EmptyBackoff);
        }
        Ok(())
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn attempter_poll_interval(&self) -> Duration {
        self.attempter_poll_interval
    }

    pub fn heartbeat_dir(&self) -> &Path {
        &self.heartbeat_dir
    }

    pub fn retention_capacity(&self) -> NonZeroUsize {
        self.retention_capacity
    }

    pub fn failover_backoff(&self) -> &[Duration] {
        &self.failover_backoff
    }
}
