//! Transport builder for creating transport instances.
//!
//! Provides a fluent builder API for constructing transports with clear separation
//! between required and optional configuration.

use std::time::Duration;

use crate::{Error, Result, TransportConfig, TransportPtr};

/// Builder for creating transport instances.
///
/// Only `uri` is required. The backend is taken from `transport_type` or, if
/// that is not set, inferred from the URI scheme.
///
/// # Examples
///
/// ## Redis with a password
/// ```no_run
/// use mom_messenger::TransportBuilder;
///
/// # async fn example() -> mom_messenger::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("redis://localhost:6379")
///     .node_id("web-1")
///     .password("s3cret")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// ## SQLite with faster polling
/// ```no_run
/// use std::time::Duration;
/// use mom_messenger::TransportBuilder;
///
/// # async fn example() -> mom_messenger::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("sqlite:/var/lib/app/messages.db")
///     .poll_interval(Duration::from_millis(250))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Explicit type
/// ```no_run
/// use mom_messenger::TransportBuilder;
///
/// # async fn example() -> mom_messenger::Result<()> {
/// let transport = TransportBuilder::new()
///     .uri("amqp://localhost:5672/%2f")
///     .transport_type("amqp")
///     .exchange("cache-sync")
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct TransportBuilder {
    config: TransportConfig,
    has_uri: bool,
}

impl TransportBuilder {
    /// Create a new transport builder with default settings.
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
            has_uri: false,
        }
    }

    /// Start from an existing configuration, e.g. one loaded from JSON.
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.has_uri = !config.uri.is_empty();
        self.config = config;
        self
    }

    /// Set the transport URI (required).
    ///
    /// Examples:
    /// - `"redis://localhost:6379"`
    /// - `"amqp://localhost:5672/%2f"`
    /// - `"sqlite:/var/lib/app/messages.db"`
    /// - `"memory://"`
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.config.uri = uri.into();
        self.has_uri = true;
        self
    }

    /// Set the node ID used as log context. Defaults to a random UUID.
    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node_id = id.into();
        self
    }

    /// Set explicit transport type.
    ///
    /// Valid values: `"memory"`, `"sql"`, `"redis"`, `"amqp"`
    pub fn transport_type(mut self, kind: impl Into<String>) -> Self {
        self.config.transport_type = Some(kind.into());
        self
    }

    /// Password sent with `AUTH` when Redis answers `NOAUTH`.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    pub fn poll_window(mut self, window: Duration) -> Self {
        self.config.poll_window = window;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.config.liveness_interval = interval;
        self
    }

    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.config.exchange = exchange.into();
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.config.table = table.into();
        self
    }

    /// Build the transport (consumes self).
    ///
    /// The transport is created but not started; hand it to
    /// [`Messenger::start`](crate::Messenger::start).
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `uri` is missing
    /// - the type is unknown or cannot be inferred from the URI
    /// - the selected backend's feature is disabled
    /// - transport creation fails
    pub async fn build(self) -> Result<TransportPtr> {
        // ---
        if !self.has_uri || self.config.uri.is_empty() {
            return Err(Error::MissingConfig("uri".into()));
        }
        create_transport(self.config).await
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

const KNOWN_TYPES: [&str; 4] = ["memory", "sql", "redis", "amqp"];

/// Create the transport `config` selects, without starting it.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the type is unknown or cannot be
/// inferred, [`Error::ConfigConflict`] if an explicit `transport_type`
/// disagrees with the URI scheme, otherwise whatever the selected factory
/// returns.
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    let kind = config.resolved_type().map(str::to_string);

    if let (Some(explicit), Some(scheme)) = (kind.as_deref(), config.scheme_type()) {
        if KNOWN_TYPES.contains(&explicit) && explicit != scheme {
            return Err(Error::ConfigConflict(format!(
                "transport_type {explicit} does not match uri {:?} ({scheme})",
                config.uri
            )));
        }
    }

    match kind.as_deref() {
        Some("memory") => crate::create_memory_transport(config).await,
        Some("sql") => crate::create_sql_transport(config).await,
        Some("redis") => crate::create_redis_transport(config).await,
        Some("amqp") => crate::create_amqp_transport(config).await,
        Some(other) => Err(Error::InvalidConfig(format!(
            "unrecognized transport_type: {other}, valid values: memory, sql, redis, amqp"
        ))),
        None => Err(Error::InvalidConfig(format!(
            "cannot infer transport type from uri {:?}",
            config.uri
        ))),
    }
}
