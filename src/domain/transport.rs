// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the lifecycle and byte-level send/receive contract
//! every backend implements. It intentionally avoids any reference to
//! concrete protocols, brokers, or client libraries.
//!
//! A transport moves opaque byte payloads between processes on named
//! channels. Envelope encoding, duplicate suppression and consumer fan-out
//! are handled one layer up by the [`Messenger`](crate::Messenger).
//!
//! Concrete implementations of this interface live under `src/transport/`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::Result;

/// Receiver of raw inbound traffic.
///
/// Installed on a transport by its owning messenger before `start()`. The
/// return value reports whether the payload reached at least one consumer.
pub trait Inbound: Send + Sync {
    fn receive(&self, channel: &str, payload: &[u8]) -> bool;
}

/// Shared base state for all transport implementations.
///
/// Holds the subscribed channel set, the `enabled` flag and the inbound
/// sink. Every field is safe to touch from the caller's task and from the
/// transport's background workers at the same time.
///
/// # Usage
///
/// Each concrete transport embeds this (usually inside its shared state):
///
/// ```ignore
/// struct RedisTransport {
///     shared: Arc<Shared>,   // Shared { base: TransportBase, ... }
/// }
///
/// impl Transport for RedisTransport {
///     fn base(&self) -> &TransportBase { &self.shared.base }
/// }
/// ```
pub struct TransportBase {
    /// Identifier used as log context (the node id).
    pub transport_id: String,
    channels: RwLock<HashSet<String>>,
    enabled: AtomicBool,
    inbound: RwLock<Option<Arc<dyn Inbound>>>,
}

impl TransportBase {
    // ---

    pub fn new(transport_id: impl Into<String>) -> Self {
        Self {
            transport_id: transport_id.into(),
            channels: RwLock::new(HashSet::new()),
            enabled: AtomicBool::new(false),
            inbound: RwLock::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Install the sink inbound traffic is dispatched to.
    pub fn attach(&self, inbound: Arc<dyn Inbound>) {
        *self.inbound.write() = Some(inbound);
    }

    pub fn detach(&self) {
        *self.inbound.write() = None;
    }

    /// Snapshot of the subscribed channels.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.read().iter().cloned().collect();
        channels.sort();
        channels
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.read().contains(channel)
    }

    /// Add channels; returns `true` if the set changed.
    pub fn add_channels(&self, channels: &[&str]) -> bool {
        let mut set = self.channels.write();
        let mut changed = false;
        for channel in channels {
            changed |= set.insert((*channel).to_string());
        }
        changed
    }

    /// Remove channels; returns `true` if the set changed.
    pub fn remove_channels(&self, channels: &[&str]) -> bool {
        let mut set = self.channels.write();
        let mut changed = false;
        for channel in channels {
            changed |= set.remove(*channel);
        }
        changed
    }

    pub fn clear_channels(&self) {
        self.channels.write().clear();
    }

    /// Hand inbound bytes to the attached sink if `channel` is subscribed.
    pub fn dispatch(&self, channel: &str, payload: &[u8]) -> bool {
        // ---
        if !self.is_subscribed(channel) {
            return false;
        }

        let inbound = self.inbound.read().clone();
        match inbound {
            Some(sink) => sink.receive(channel, payload),
            None => false,
        }
    }
}

/// Transport abstraction.
///
/// A `Transport` provides best-effort, at-most-once delivery of byte payloads
/// on named channels between otherwise unconnected processes.
///
/// Implementations must ensure that:
/// - `enabled` becomes `true` only once the transport can accept sends, and
///   `send()` is a no-op while it is `false`.
/// - `start()` may be called again after `close()`.
/// - `close()` stops every background worker, is idempotent, and is safe to
///   call when `start()` failed or never ran.
/// - Transient backend errors inside workers are logged and never terminate
///   a worker loop; only the first connection attempt in `start()` may fail
///   the call.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. This is an implementation detail; consumers
/// should treat methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Returns a reference to the shared base state.
    ///
    /// Required method - each concrete transport must implement this
    /// by returning its embedded `TransportBase`.
    fn base(&self) -> &TransportBase;

    /// Returns the transport_id of the transport.
    fn transport_id(&self) -> &str {
        &self.base().transport_id
    }

    fn is_enabled(&self) -> bool {
        self.base().is_enabled()
    }

    /// Open backend resources and spawn background workers.
    async fn start(&self) -> Result<()>;

    /// Release backend resources and stop background workers.
    async fn close(&self) -> Result<()>;

    /// Start receiving the given channels.
    ///
    /// The default implementation only records them; backends that must act
    /// on the server side override it.
    async fn subscribe(&self, channels: &[&str]) -> Result<()> {
        self.base().add_channels(channels);
        Ok(())
    }

    /// Stop receiving the given channels.
    async fn unsubscribe(&self, channels: &[&str]) -> Result<()> {
        self.base().remove_channels(channels);
        Ok(())
    }

    /// Publish raw bytes on `channel`. No-op while disabled.
    async fn send(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Forget every subscribed channel.
    fn clear(&self) {
        self.base().clear_channels();
    }
}

/// Shared transport pointer.
///
/// This is an `Arc<dyn Transport>`, which means:
/// - `.clone()` is cheap (only increments a reference count)
/// - Multiple clones share the same underlying connection
/// - Used to erase concrete transport types behind a stable domain interface.
pub type TransportPtr = Arc<dyn Transport>;
