//! Link configuration.
//!
//! [`LinkConfig`] carries the node address and the protocol timing knobs.
//! It can be built in code (`Default` plus `with_*` helpers) or loaded from a
//! JSON file where durations are given in milliseconds:
//!
//! ```
//! use lora_link::config::LinkConfig;
//!
//! let config = LinkConfig::from_json(r#"{ "node_address": 2000, "ack_timeout_ms": 1000 }"#).unwrap();
//! assert_eq!(config.node_address, 2000);
//! assert_eq!(config.max_retries, 3);
//! ```

use crate::frame::{Address, MessageId, BROADCAST_ADDRESS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default time to wait for an ACK before retransmitting.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of retransmissions after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default receive poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of (source, id) pairs remembered for duplicate detection.
pub const DEFAULT_SEEN_SET_CAPACITY: usize = 32;

/// Default pause after a radio error in the receive loop.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Default depth of the send command queue.
pub const DEFAULT_COMMAND_QUEUE: usize = 16;

/// Upper bound for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 255;

/// What a reliable send does while another one is still waiting for its ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait in FIFO order behind the in-flight message.
    #[default]
    Queue,
    /// Return [`SendError::Busy`](crate::SendError::Busy) immediately.
    FailFast,
}

/// Configuration for one node on the medium.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// This node's address. Must not be the broadcast address.
    pub node_address: Address,
    /// ACK wait per attempt, measured from the most recent transmission.
    #[serde(rename = "ack_timeout_ms", with = "duration_ms")]
    pub ack_timeout: Duration,
    /// Retransmissions after the first attempt.
    pub max_retries: u32,
    /// Capacity of the duplicate-detection history.
    pub seen_set_capacity: usize,
    /// Pause between receive polls.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    /// Acknowledge data frames addressed to this node.
    pub auto_ack: bool,
    /// Extend each ACK wait by a random fraction of the timeout, so two
    /// nodes that collided do not retransmit in lockstep.
    pub ack_jitter: bool,
    /// Behaviour of reliable sends while one is in flight.
    pub busy_policy: BusyPolicy,
    /// Pause after the radio refuses to enter receive mode.
    #[serde(rename = "error_backoff_ms", with = "duration_ms")]
    pub error_backoff: Duration,
    /// Depth of the send command queue.
    pub command_queue: usize,
    /// First message id to use. Random when unset.
    pub initial_message_id: Option<MessageId>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            node_address: 1,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            seen_set_capacity: DEFAULT_SEEN_SET_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            auto_ack: true,
            ack_jitter: false,
            busy_policy: BusyPolicy::Queue,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            command_queue: DEFAULT_COMMAND_QUEUE,
            initial_message_id: None,
        }
    }
}

impl LinkConfig {
    /// Default configuration for the given node address.
    pub fn new(node_address: Address) -> Self {
        Self {
            node_address,
            ..Default::default()
        }
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_seen_set_capacity(mut self, capacity: usize) -> Self {
        self.seen_set_capacity = capacity;
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn with_ack_jitter(mut self, ack_jitter: bool) -> Self {
        self.ack_jitter = ack_jitter;
        self
    }

    pub fn with_initial_message_id(mut self, id: MessageId) -> Self {
        self.initial_message_id = Some(id);
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_address == BROADCAST_ADDRESS {
            return Err(ConfigError::InvalidConfig(
                "node_address must not be the broadcast address",
            ));
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig("ack_timeout must be > 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidConfig("poll_interval must be > 0"));
        }
        if self.poll_interval > self.ack_timeout {
            return Err(ConfigError::InvalidConfig(
                "poll_interval must not exceed ack_timeout",
            ));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::InvalidConfig("max_retries must be <= 255"));
        }
        if self.seen_set_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "seen_set_capacity must be > 0",
            ));
        }
        if self.command_queue == 0 {
            return Err(ConfigError::InvalidConfig("command_queue must be > 0"));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json(&json)
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// A field has an unusable value.
    InvalidConfig(&'static str),
    /// The JSON could not be parsed.
    Parse(String),
    /// The configuration file could not be read.
    Io(std::io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid link config: {}", msg),
            Self::Parse(msg) => write!(f, "config parse error: {}", msg),
            Self::Io(e) => write!(f, "failed to read config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Serde adapter: `Duration` as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
