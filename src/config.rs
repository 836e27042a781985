//! Worker configuration.
//!
//! Configuration is loaded from a TOML file and then overridden by
//! `TASKBRIDGE_`-prefixed environment variables; defaults are
//! development-friendly. Unlike plain display settings, the strategy knobs
//! change delivery semantics, so a malformed override is a load error
//! rather than a silently kept default.
//!
//! # Example TOML configuration
//!
//! ```toml
//! [worker]
//! max_tasks = 10
//! lock_duration_ms = 60000
//! qos = ">="
//! completion_strategy = "pessimistic"
//!
//! [queue]
//! base_url = "http://engine:8080/engine-rest"
//! topic = "execute_in_vid"
//!
//! [broker]
//! url = "nats://broker:4222"
//! response_topic = "response"
//!
//! [directory]
//! base_url = "http://registry:8080"
//! permissions_url = "http://permissions:8080"
//!
//! [auth]
//! endpoint = "http://keycloak:8080/auth/realms/master/protocol/openid-connect/token"
//! client_id = "taskbridge"
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::{CompletionStrategy, QosStrategy};

/// File consulted when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "taskbridge.toml";

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config file '{path}': {error}")]
    Io {
        /// Path to the configuration file.
        path: String,
        /// Underlying IO error text.
        error: String,
    },

    /// The configuration did not parse as TOML.
    #[error("cannot parse config: {0}")]
    Parse(String),

    /// An environment override carries an unusable value.
    #[error("invalid value '{value}' for {key}")]
    Invalid {
        /// The environment variable.
        key: &'static str,
        /// The offending value.
        value: String,
    },
}

/// The complete worker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Intake and policy settings.
    pub worker: WorkerSection,
    /// Workflow engine connection.
    pub queue: QueueSection,
    /// Message broker connection.
    pub broker: BrokerSection,
    /// Device registry and permission service connection.
    pub directory: DirectorySection,
    /// Token endpoint credentials.
    pub auth: AuthSection,
}

/// `[worker]`: intake tuning and the two policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    /// Fetch batch width.
    pub max_tasks: u32,
    /// Idle wait between empty fetch cycles, in milliseconds.
    pub poll_interval_ms: u64,
    /// Queue lock TTL, also the response staleness horizon, in
    /// milliseconds.
    pub lock_duration_ms: u64,
    /// Dispatch QoS strategy, `"<="` or `">="`.
    pub qos: QosStrategy,
    /// Completion strategy, `"optimistic"` or `"pessimistic"`.
    pub completion_strategy: CompletionStrategy,
    /// Grace delay before completion calls, in milliseconds.
    pub completion_grace_ms: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_tasks: 10,
            poll_interval_ms: 200,
            lock_duration_ms: 60_000,
            qos: QosStrategy::AtLeastOnce,
            completion_strategy: CompletionStrategy::Pessimistic,
            completion_grace_ms: 100,
        }
    }
}

impl WorkerSection {
    /// Idle wait between empty fetch cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Queue lock TTL and staleness horizon.
    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    /// Grace delay before completion calls.
    pub fn completion_grace(&self) -> Duration {
        Duration::from_millis(self.completion_grace_ms)
    }
}

/// `[queue]`: the workflow engine's external-task API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// External-task API root.
    pub base_url: String,
    /// Subscribed external-task topic.
    pub topic: String,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/engine-rest".into(),
            topic: "execute_in_vid".into(),
        }
    }
}

/// `[broker]`: the protocol handler broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    /// Broker connection URL.
    pub url: String,
    /// Shared response topic.
    pub response_topic: String,
    /// Consumer group name for the response topic.
    pub group: String,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".into(),
            response_topic: "response".into(),
            group: "taskbridge".into(),
        }
    }
}

/// `[directory]`: device registry and permission service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySection {
    /// Registry API root.
    pub base_url: String,
    /// Permission service API root.
    pub permissions_url: String,
    /// Metadata cache TTL, in milliseconds.
    pub cache_ttl_ms: u64,
}

impl Default for DirectorySection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081".into(),
            permissions_url: "http://localhost:8082".into(),
            cache_ttl_ms: 60_000,
        }
    }
}

impl DirectorySection {
    /// Metadata cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// `[auth]`: the OpenID Connect token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Full token endpoint URL.
    pub endpoint: String,
    /// Client id for the client-credentials grant.
    pub client_id: String,
    /// Client secret for the client-credentials grant.
    pub client_secret: String,
    /// Refresh tokens this long before their expiry, in milliseconds.
    pub expiry_buffer_ms: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            endpoint:
                "http://localhost:8087/auth/realms/master/protocol/openid-connect/token"
                    .into(),
            client_id: "taskbridge".into(),
            client_secret: String::new(),
            expiry_buffer_ms: 2_000,
        }
    }
}

impl AuthSection {
    /// How long before expiry a token counts as unusable.
    pub fn expiry_buffer(&self) -> Duration {
        Duration::from_millis(self.expiry_buffer_ms)
    }
}

impl WorkerConfig {
    /// Loads `path` when given, otherwise [`DEFAULT_CONFIG_PATH`] when it
    /// exists, otherwise defaults. Environment overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    })?;
                Self::from_toml(&contents)?
            }
            None => match std::fs::read_to_string(DEFAULT_CONFIG_PATH) {
                Ok(contents) => Self::from_toml(&contents)?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        override_parsed(&mut self.worker.max_tasks, "TASKBRIDGE_MAX_TASKS")?;
        override_parsed(&mut self.worker.poll_interval_ms, "TASKBRIDGE_POLL_INTERVAL_MS")?;
        override_parsed(&mut self.worker.lock_duration_ms, "TASKBRIDGE_LOCK_DURATION_MS")?;
        override_parsed(&mut self.worker.qos, "TASKBRIDGE_QOS")?;
        override_parsed(
            &mut self.worker.completion_strategy,
            "TASKBRIDGE_COMPLETION_STRATEGY",
        )?;
        override_parsed(
            &mut self.worker.completion_grace_ms,
            "TASKBRIDGE_COMPLETION_GRACE_MS",
        )?;
        override_string(&mut self.queue.base_url, "TASKBRIDGE_QUEUE_URL");
        override_string(&mut self.queue.topic, "TASKBRIDGE_QUEUE_TOPIC");
        override_string(&mut self.broker.url, "TASKBRIDGE_BROKER_URL");
        override_string(&mut self.broker.response_topic, "TASKBRIDGE_RESPONSE_TOPIC");
        override_string(&mut self.broker.group, "TASKBRIDGE_GROUP");
        override_string(&mut self.directory.base_url, "TASKBRIDGE_DIRECTORY_URL");
        override_string(&mut self.directory.permissions_url, "TASKBRIDGE_PERMISSIONS_URL");
        override_parsed(&mut self.directory.cache_ttl_ms, "TASKBRIDGE_CACHE_TTL_MS")?;
        override_string(&mut self.auth.endpoint, "TASKBRIDGE_AUTH_ENDPOINT");
        override_string(&mut self.auth.client_id, "TASKBRIDGE_CLIENT_ID");
        override_string(&mut self.auth.client_secret, "TASKBRIDGE_CLIENT_SECRET");
        override_parsed(&mut self.auth.expiry_buffer_ms, "TASKBRIDGE_EXPIRY_BUFFER_MS")?;
        Ok(())
    }
}

fn override_string(slot: &mut String, key: &'static str) {
    if let Ok(value) = std::env::var(key) {
        *slot = value;
    }
}

fn override_parsed<T: FromStr>(slot: &mut T, key: &'static str) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(key) {
        *slot = value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: value.clone() })?;
    }
    Ok(())
}
