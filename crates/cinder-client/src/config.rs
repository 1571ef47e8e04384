use std::time::Duration;

use serde::{Deserialize, Deserializer};

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn duration_ms<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
}

/// Retry bound and per-attempt deadline used by the executor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Attempts per operation, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Deadline for a single attempt: acquiring the connection and the
    /// remote call each get this long.
    #[serde(rename = "attempt_timeout_ms", deserialize_with = "duration_ms")]
    pub attempt_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub(crate) fn attempt_bound(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// `host:port` of every node the pool may dial.
    pub nodes: Vec<String>,
    pub pool_size_per_node: usize,
    #[serde(rename = "connect_timeout_ms", deserialize_with = "duration_ms")]
    pub connect_timeout: Duration,
    /// How long a node that refused a connection is skipped.
    #[serde(rename = "node_cooldown_ms", deserialize_with = "duration_ms")]
    pub node_cooldown: Duration,
    /// How long a node whose connection was discarded is passed over in
    /// favour of healthy nodes.
    #[serde(rename = "discard_cooldown_ms", deserialize_with = "duration_ms")]
    pub discard_cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["127.0.0.1:9160".to_string()],
            pool_size_per_node: 4,
            connect_timeout: Duration::from_secs(2),
            node_cooldown: Duration::from_secs(10),
            discard_cooldown: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_pool_size_per_node(mut self, size: usize) -> Self {
        self.pool_size_per_node = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_node_cooldown(mut self, cooldown: Duration) -> Self {
        self.node_cooldown = cooldown;
        self
    }

    pub fn with_discard_cooldown(mut self, cooldown: Duration) -> Self {
        self.discard_cooldown = cooldown;
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    pub executor: ExecutorConfig,
}

impl ClientConfig {
    /// Defaults overridden by whichever `CINDER_*` variables are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(nodes) = std::env::var("CINDER_NODES") {
            let nodes: Vec<String> = nodes
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect();
            if !nodes.is_empty() {
                config.pool.nodes = nodes;
            }
        }
        if let Some(size) = env_parse("CINDER_POOL_SIZE") {
            config.pool.pool_size_per_node = size;
        }
        if let Some(ms) = env_parse("CINDER_CONNECT_TIMEOUT_MS") {
            config.pool.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("CINDER_NODE_COOLDOWN_MS") {
            config.pool.node_cooldown = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("CINDER_DISCARD_COOLDOWN_MS") {
            config.pool.discard_cooldown = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse("CINDER_MAX_ATTEMPTS") {
            config.executor.max_attempts = attempts;
        }
        if let Some(ms) = env_parse("CINDER_ATTEMPT_TIMEOUT_MS") {
            config.executor.attempt_timeout = Duration::from_millis(ms);
        }
        config
    }
}
