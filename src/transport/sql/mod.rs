//! Relational-store transports.
//!
//! This module contains the polling transport backed by a shared SQL table.
//! Currently supports:
//! - sqlite - SQLite via rusqlite (store.rs, polling.rs)

#[cfg(feature = "transport_sql")]
mod polling;

#[cfg(feature = "transport_sql")]
mod store;

#[cfg(feature = "transport_sql")]
pub use polling::create_transport as create_sql_transport;

#[cfg(not(feature = "transport_sql"))]
pub async fn create_sql_transport(
    _config: crate::TransportConfig,
) -> crate::Result<crate::TransportPtr> {
    Err(crate::Error::Transport(
        "transport_sql feature is not enabled".into(),
    ))
}
