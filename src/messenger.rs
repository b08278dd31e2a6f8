//! Channel messaging on top of a single active transport.
//!
//! The [`Messenger`] owns at most one [`Transport`](crate::Transport) at a
//! time. It keeps the channel → consumer registry, wraps outgoing payloads in
//! an [`Envelope`] with a fresh random id, and suppresses any id it has
//! already sent or delivered within the dedup TTL. Broadcast backends that
//! echo a sender's own publish back to it are therefore harmless.
//!
//! Delivery is at-most-once per id and best-effort; `send` returning `true`
//! only means the bytes were handed to the transport.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::router::Router;
use crate::{
    //
    log_debug,
    log_error,
    log_info,
    ConsumerPtr,
    Envelope,
    ExpiringSet,
    Inbound,
    Result,
    TransportPtr,
};

/// Default lifetime of remembered message ids.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(10);

/// Pub/sub front end over one [`TransportPtr`].
///
/// # Example
///
/// ```no_run
/// use mom_messenger::{consumer, Messenger, TransportBuilder};
///
/// # async fn example() -> mom_messenger::Result<()> {
/// let messenger = Messenger::new();
/// messenger
///     .subscribe("cache-invalidate", consumer(|key| println!("evict {key}")))
///     .await?;
///
/// let transport = TransportBuilder::new()
///     .uri("redis://127.0.0.1:6379")
///     .node_id("web-1")
///     .build()
///     .await?;
/// messenger.start(transport).await?;
///
/// messenger.send("cache-invalidate", "user:42").await;
/// # Ok(())
/// # }
/// ```
pub struct Messenger {
    router: Arc<Router>,
    transport: RwLock<Option<TransportPtr>>,
    lifecycle: Mutex<()>,
}

impl Default for Messenger {
    fn default() -> Self {
        Self::new()
    }
}

impl Messenger {
    // ---

    pub fn new() -> Self {
        Self::with_dedup_ttl(DEFAULT_DEDUP_TTL)
    }

    /// Create a messenger remembering message ids for `ttl`.
    pub fn with_dedup_ttl(ttl: Duration) -> Self {
        Self {
            router: Arc::new(Router::new(ExpiringSet::new(ttl))),
            transport: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// The active transport, if any.
    pub fn transport(&self) -> Option<TransportPtr> {
        self.transport.read().clone()
    }

    /// Whether a transport is installed and accepting sends.
    pub fn is_started(&self) -> bool {
        self.transport().is_some_and(|t| t.is_enabled())
    }

    /// Channels with at least one registered consumer.
    pub fn channels(&self) -> Vec<String> {
        self.router.channels()
    }

    /// Make `transport` the active transport and start it.
    ///
    /// Any previous transport is closed first. The new transport is seeded
    /// with every channel that currently has consumers. If `start()` fails
    /// the transport stays installed but disabled, so a later `start` or
    /// `close` cleans it up.
    pub async fn start(&self, transport: TransportPtr) -> Result<()> {
        // ---
        let _guard = self.lifecycle.lock().await;

        let previous = self.transport.write().take();
        if let Some(previous) = previous {
            log_debug!("{}: closing previous transport", previous.transport_id());
            if let Err(err) = previous.close().await {
                log_error!("{}: close failed: {err}", previous.transport_id());
            }
            previous.base().detach();
        }

        let sink: Arc<dyn Inbound> = self.router.clone();
        transport.base().attach(sink);
        *self.transport.write() = Some(transport.clone());

        let channels = self.router.channels();
        let refs: Vec<&str> = channels.iter().map(String::as_str).collect();
        transport.base().add_channels(&refs);

        transport.start().await?;
        log_info!(
            "{}: messenger started with {} channel(s)",
            transport.transport_id(),
            channels.len()
        );
        Ok(())
    }

    /// Close and detach the active transport. Safe to call repeatedly.
    pub async fn close(&self) -> Result<()> {
        // ---
        let _guard = self.lifecycle.lock().await;

        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.close().await?;
            transport.base().detach();
        }
        Ok(())
    }

    /// Register `consumer` for `channel`.
    ///
    /// Returns `false` if this exact consumer was already registered there.
    pub async fn subscribe(&self, channel: &str, consumer: ConsumerPtr) -> Result<bool> {
        // ---
        let added = self.router.register(channel, consumer);

        if let Some(transport) = self.transport() {
            transport.subscribe(&[channel]).await?;
        }
        Ok(added)
    }

    /// Remove one consumer. The transport stops receiving the channel once
    /// it has no consumers left.
    pub async fn unsubscribe(&self, channel: &str, consumer: &ConsumerPtr) -> Result<bool> {
        // ---
        let (removed, empty) = self.router.deregister(channel, consumer);

        if removed && empty {
            if let Some(transport) = self.transport() {
                transport.unsubscribe(&[channel]).await?;
            }
        }
        Ok(removed)
    }

    /// Remove every consumer of `channel` and unsubscribe the transport.
    pub async fn unsubscribe_all(&self, channel: &str) -> Result<bool> {
        // ---
        let removed = self.router.deregister_all(channel);

        if let Some(transport) = self.transport() {
            transport.unsubscribe(&[channel]).await?;
        }
        Ok(removed)
    }

    /// Publish `message` on `channel`.
    ///
    /// Returns `false` if no started transport is installed, the message is
    /// too large to encode, or the transport reported an error.
    pub async fn send(&self, channel: &str, message: &str) -> bool {
        // ---
        let Some(transport) = self.transport() else {
            return false;
        };
        if !transport.is_enabled() {
            return false;
        }

        let env = Envelope::new(message);
        let bytes = match env.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                log_error!("{}: cannot encode message on {channel}: {err}", transport.transport_id());
                return false;
            }
        };

        self.router.mark_sent(env.id);

        match transport.send(channel, bytes).await {
            Ok(()) => true,
            Err(err) => {
                log_error!("{}: send on {channel} failed: {err}", transport.transport_id());
                false
            }
        }
    }

    /// Feed raw bytes received on `channel` through dedup and fan-out.
    ///
    /// Returns `true` if the envelope was new and dispatched.
    pub fn receive(&self, channel: &str, bytes: &[u8]) -> bool {
        self.router.receive(channel, bytes)
    }

    /// Drop transport channel state, all consumers and the dedup cache.
    pub fn clear(&self) {
        // ---
        if let Some(transport) = self.transport() {
            transport.clear();
        }
        self.router.clear();
    }
}
