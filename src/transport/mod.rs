//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait. Network backends are hidden behind feature flags
//! and exposed only through constructor functions.
//!
//! Domain code must not depend on transport-specific types.

mod amqp;
mod forward;
mod memory;
mod redis;
mod sql;

#[cfg(any(feature = "transport_redis", feature = "transport_amqp"))]
mod reconnect;

#[cfg(any(feature = "transport_redis", feature = "transport_amqp"))]
pub(crate) use reconnect::Backoff;

pub use amqp::create_amqp_transport;
pub use redis::create_redis_transport;
pub use sql::create_sql_transport;

pub use memory::{
    //
    create_memory_transport,
    create_memory_transport_with_hub,
    MemoryHub,
};

pub use forward::{
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
