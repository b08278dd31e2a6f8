//! Public, backend-agnostic transport configuration.
//!
//! One struct carries the settings of every backend; each backend reads the
//! fields it understands and ignores the rest. Durations serialize as whole
//! milliseconds so configs stay readable in JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Default wait between reconnect attempts (pub/sub and broker backends).
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(8);
/// Default poll period of the SQL backend.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default cleanup period of the SQL backend.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);
/// Rows younger than this are delivered by a poll.
pub const DEFAULT_POLL_WINDOW: Duration = Duration::from_secs(30);
/// Rows older than this are deleted by cleanup.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);
/// Default liveness check period of the broker backend.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(30);
/// Default topic exchange name of the broker backend.
pub const DEFAULT_EXCHANGE: &str = "messenger";
/// Default table name of the SQL backend.
pub const DEFAULT_TABLE: &str = "messenger_messages";

mod millis {
    // ---
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Configuration for creating a transport instance.
///
/// Passed to the `create_*_transport()` factories, usually via
/// [`TransportBuilder`](crate::TransportBuilder).
///
/// # Example
///
/// ```
/// use mom_messenger::TransportConfig;
///
/// let config = TransportConfig::from_json(
///     r#"{ "uri": "redis://127.0.0.1:6379", "node_id": "web-1", "reconnect_delay": 2000 }"#,
/// ).unwrap();
/// assert_eq!(config.reconnect_delay.as_secs(), 2);
/// assert_eq!(config.exchange, "messenger");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    /// Backend URI (e.g. `"redis://localhost:6379"`, `"amqp://localhost:5672/%2f"`,
    /// `"sqlite:/var/lib/app/messages.db"`, `"memory://"`).
    pub uri: String,

    /// Node ID for this transport instance, used as log context.
    pub node_id: String,

    /// Optional transport type override (`"memory"`, `"sql"`, `"redis"`, `"amqp"`).
    /// If `None`, the type is inferred from the URI scheme.
    pub transport_type: Option<String>,

    /// Password used to re-authenticate a Redis connection after `NOAUTH`.
    pub password: Option<String>,

    /// Fixed wait between failed reconnect attempts.
    #[serde(with = "millis")]
    pub reconnect_delay: Duration,

    #[serde(with = "millis")]
    pub poll_interval: Duration,

    #[serde(with = "millis")]
    pub cleanup_interval: Duration,

    #[serde(with = "millis")]
    pub poll_window: Duration,

    #[serde(with = "millis")]
    pub retention: Duration,

    /// How often the broker backend verifies its connection and channel.
    #[serde(with = "millis")]
    pub liveness_interval: Duration,

    /// Topic exchange used by the broker backend.
    pub exchange: String,

    /// Table used by the SQL backend. Must be a plain SQL identifier.
    pub table: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            node_id: uuid::Uuid::new_v4().to_string(),
            transport_type: None,
            password: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            poll_window: DEFAULT_POLL_WINDOW,
            retention: DEFAULT_RETENTION,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            exchange: DEFAULT_EXCHANGE.to_string(),
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl TransportConfig {
    // ---

    /// Config for a backend reachable at `uri`.
    pub fn with_uri(uri: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// Config for the in-memory transport.
    pub fn memory(node_id: impl Into<String>) -> Self {
        Self {
            uri: "memory://".to_string(),
            node_id: node_id.into(),
            transport_type: Some("memory".to_string()),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The transport type, explicit or inferred from the URI scheme.
    pub fn resolved_type(&self) -> Option<&str> {
        // ---
        match self.transport_type.as_deref() {
            Some(kind) => Some(kind),
            None => self.scheme_type(),
        }
    }

    /// The transport type the URI scheme alone implies.
    pub fn scheme_type(&self) -> Option<&'static str> {
        // ---
        let uri = self.uri.as_str();
        if uri.starts_with("redis://") || uri.starts_with("rediss://") {
            Some("redis")
        } else if uri.starts_with("amqp://") || uri.starts_with("amqps://") {
            Some("amqp")
        } else if uri.starts_with("sqlite:") || uri.ends_with(".db") || uri.ends_with(".sqlite") {
            Some("sql")
        } else if uri.starts_with("memory:") {
            Some("memory")
        } else {
            None
        }
    }
}
