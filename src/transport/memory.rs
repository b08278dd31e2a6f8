//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, single-process
//! deployments, and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - A send is delivered synchronously to every started transport on the same
//!   [`MemoryHub`] that is subscribed to the channel, **including the sender
//!   itself**. This mirrors broadcast backends such as Redis pub/sub and is
//!   what the messenger's duplicate suppression is designed for.
//! - A transport that is not started neither sends nor receives.
//! - Channel matching is exact, case-sensitive string equality.
//!
//! ## Non-Goals
//!
//! This transport does not attempt to emulate the failure modes, persistence,
//! or latency of any specific backend.

use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    // ---
    log_debug,
    Result,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// Shared message bus for the in-memory transport.
///
/// All `MemoryTransport` instances that share a `MemoryHub` can publish and
/// receive each other's messages, exactly as processes attached to a real
/// backend would.
///
/// For tests that need isolation between parallel cases, construct a hub
/// explicitly and pass it to [`create_memory_transport_with_hub`]:
///
/// ```
/// # use mom_messenger::{MemoryHub, TransportConfig};
/// # async fn example() -> mom_messenger::Result<()> {
/// let hub = MemoryHub::new();
///
/// let a = mom_messenger::create_memory_transport_with_hub(TransportConfig::memory("a"), hub.clone()).await?;
/// let b = mom_messenger::create_memory_transport_with_hub(TransportConfig::memory("b"), hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    members: RwLock<Vec<Weak<MemoryTransport>>>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    fn join(&self, member: &Arc<MemoryTransport>) {
        // ---
        let mut members = self.members.write();
        members.retain(|m| m.strong_count() > 0);
        members.push(Arc::downgrade(member));
    }

    fn broadcast(&self, sender: &str, channel: &str, payload: &[u8]) -> usize {
        // ---
        let members: Vec<Arc<MemoryTransport>> = self
            .members
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        let mut delivered = 0;
        for member in members {
            if member.base.is_enabled() && member.base.dispatch(channel, payload) {
                delivered += 1;
            }
        }

        log_debug!("{sender}: delivered on {channel} to {delivered} member(s)");
        delivered
    }

    /// Number of live transports attached to this hub.
    pub fn member_count(&self) -> usize {
        self.members
            .read()
            .iter()
            .filter(|m| m.strong_count() > 0)
            .count()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            members: RwLock::new(Vec::new()),
        }
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes sends through a shared [`MemoryHub`].
struct MemoryTransport {
    // ---
    base: TransportBase,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn start(&self) -> Result<()> {
        // ---
        self.base.set_enabled(true);
        log_debug!("{}: memory transport started", self.base.transport_id);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.base.set_enabled(false);
        log_debug!("{}: memory transport closed", self.base.transport_id);
        Ok(())
    }

    /// Deliver to every started hub member subscribed to `channel`.
    async fn send(&self, channel: &str, payload: Bytes) -> Result<()> {
        // ---
        if !self.base.is_enabled() {
            return Ok(());
        }
        self.hub
            .broadcast(&self.base.transport_id, channel, &payload);
        Ok(())
    }
}

/// Create a new in-memory transport attached to the process-global hub.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport attached to `hub`.
///
/// # Errors
///
/// Currently infallible; always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    config: TransportConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create memory transport", config.node_id);

    let transport = Arc::new(MemoryTransport {
        base: TransportBase::new(config.node_id),
        hub: Arc::clone(&hub),
    });
    hub.join(&transport);

    Ok(transport)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::Inbound;

    struct Accept;

    impl Inbound for Accept {
        fn receive(&self, _channel: &str, _payload: &[u8]) -> bool {
            true
        }
    }

    async fn member(hub: &Arc<MemoryHub>, id: &str, channels: &[&str]) -> TransportPtr {
        let transport = create_memory_transport_with_hub(TransportConfig::memory(id), Arc::clone(hub))
            .await
            .unwrap();
        transport.base().attach(Arc::new(Accept));
        transport.subscribe(channels).await.unwrap();
        transport.start().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_broadcast_counts_started_subscribed_members() {
        // ---
        let hub = MemoryHub::new();
        let a = member(&hub, "a", &["c"]).await;
        let _b = member(&hub, "b", &["c"]).await;
        let _other = member(&hub, "other", &["d"]).await;

        // the sender is a member too
        assert_eq!(hub.broadcast("a", "c", b"x"), 2);

        a.close().await.unwrap();
        assert_eq!(hub.broadcast("a", "c", b"x"), 1);
        assert_eq!(hub.member_count(), 3);
    }
}
