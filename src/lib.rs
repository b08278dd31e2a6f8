//! Cross-process channel messaging with duplicate suppression.
//!
//! This library lets otherwise unconnected processes exchange short string
//! messages on named channels, e.g. to invalidate caches on every instance of
//! a service. A [`Messenger`] keeps the channel/consumer registry and drops
//! redelivered messages; a [`Transport`] moves the bytes. Backends:
//!
//! - SQL polling over a shared SQLite table (`transport_sql`)
//! - Redis Pub/Sub (`transport_redis`)
//! - AMQP topic exchange (`transport_amqp`)
//! - forwarding bridge over a host-provided pipe
//! - in-memory hub, for tests and single-process use
//!

// Import all sub modules once...
mod domain;
mod macros;
mod messenger;
mod router;
mod transport;

mod expiring_set;
mod transport_builder;
mod transport_config;

mod error;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use messenger::{Messenger, DEFAULT_DEDUP_TTL};
pub use router::{consumer, Consumer, ConsumerPtr};

pub use expiring_set::{ExpiringSet, ExpiringSetBuilder, DEFAULT_TTL};

pub use transport_builder::{create_transport, TransportBuilder};
pub use transport_config::{
    //
    TransportConfig,
    DEFAULT_CLEANUP_INTERVAL,
    DEFAULT_EXCHANGE,
    DEFAULT_LIVENESS_INTERVAL,
    DEFAULT_POLL_INTERVAL,
    DEFAULT_POLL_WINDOW,
    DEFAULT_RECONNECT_DELAY,
    DEFAULT_RETENTION,
    DEFAULT_TABLE,
};

pub use error::{Error, Result};

pub use transport::{
    //
    create_amqp_transport,
    create_memory_transport,
    create_memory_transport_with_hub,
    create_redis_transport,
    create_sql_transport,
    MemoryHub,
};

pub use transport::{
    //
    BridgeRole,
    ForwardFrame,
    ForwardingBridge,
    FrameSource,
    HostChannel,
    RelayPolicy,
    Target,
    FORWARD_SUBCHANNEL,
    TARGET_ALL,
};

// --- public re-exports
pub use domain::{
    //
    get_blob,
    get_utf,
    put_blob,
    put_utf,
    Envelope,
    Inbound,
    Transport,
    TransportBase,
    TransportPtr,
    MAX_MESSAGE_ID,
    MAX_UTF_LEN,
};
