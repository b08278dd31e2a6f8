//! AMQP protocol transports.
//!
//! This module contains transport implementations for AMQP-based brokers.
//! Currently supports:
//! - lapin - AMQP 0-9-1 (RabbitMQ) over a shared topic exchange

#[cfg(feature = "transport_amqp")]
mod lapin;

#[cfg(feature = "transport_amqp")]
pub use lapin::create_transport as create_amqp_transport;

#[cfg(not(feature = "transport_amqp"))]
pub async fn create_amqp_transport(
    _config: crate::TransportConfig,
) -> crate::Result<crate::TransportPtr> {
    Err(crate::Error::Transport(
        "transport_amqp feature is not enabled".into(),
    ))
}
