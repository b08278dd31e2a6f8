//! Forwarding bridge: logical channels multiplexed over one host pipe.
//!
//! Some deployments have no shared backend at all; the only link between
//! processes is a single message pipe supplied by the host (for example a
//! proxy talking to the servers behind it). The bridge wraps every send in a
//! [`ForwardFrame`] and hands it to a [`HostChannel`]; the host feeds frames
//! it receives back in through [`ForwardingBridge::handle_frame`].
//!
//! A bridge owns no connection and no background task. `start()` and
//! `close()` only toggle whether it sends and dispatches.
//!
//! ## Relaying
//!
//! A proxy may re-broadcast what one backend sent to the other backends,
//! according to its [`RelayPolicy`]. A frame is never relayed:
//!
//! - when it came from a peer with the same [`BridgeRole`] as this bridge,
//!   which is what stops frames bouncing between two proxies;
//! - back to the destination it came from;
//! - when it was addressed to this bridge by name, since it has already
//!   arrived.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;

use super::frame::{ForwardFrame, Target};
use crate::{
    //
    log_debug,
    log_error,
    Result,
    Transport,
    TransportBase,
};

/// The single physical channel a bridge runs over.
pub trait HostChannel: Send + Sync {
    /// Deliver `frame` to one named destination, or to every reachable
    /// destination when `destination` is `None`.
    fn dispatch(&self, destination: Option<&str>, frame: Bytes) -> Result<()>;

    /// Names of the destinations currently reachable through the host.
    fn destinations(&self) -> Vec<String>;
}

/// Which side of the host pipe a bridge (or a frame's sender) sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BridgeRole {
    Backend,
    Proxy,
}

/// Which destinations received frames are re-broadcast to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RelayPolicy {
    #[default]
    None,
    All,
    Only(HashSet<String>),
}

/// Origin of an inbound frame, as reported by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSource {
    pub kind: BridgeRole,
    pub name: String,
}

impl FrameSource {
    pub fn new(kind: BridgeRole, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// `Transport` over a [`HostChannel`].
pub struct ForwardingBridge {
    // ---
    base: TransportBase,
    role: BridgeRole,
    host: Arc<dyn HostChannel>,
    relay: RelayPolicy,
    target: Target,
}

impl ForwardingBridge {
    // ---

    /// Create a bridge named `node_id` that broadcasts to every destination
    /// and relays nothing.
    pub fn new(node_id: impl Into<String>, role: BridgeRole, host: Arc<dyn HostChannel>) -> Self {
        Self {
            base: TransportBase::new(node_id),
            role,
            host,
            relay: RelayPolicy::None,
            target: Target::All,
        }
    }

    pub fn with_relay(mut self, relay: RelayPolicy) -> Self {
        self.relay = relay;
        self
    }

    /// Address outgoing frames to `target` instead of every destination.
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn role(&self) -> BridgeRole {
        self.role
    }

    pub fn relay_policy(&self) -> &RelayPolicy {
        &self.relay
    }

    /// Feed one frame received from the host pipe.
    ///
    /// Returns `true` if the frame reached a local consumer. Frames on other
    /// subchannels and malformed frames are ignored.
    pub fn handle_frame(&self, source: &FrameSource, bytes: &[u8]) -> bool {
        // ---
        if !self.base.is_enabled() {
            return false;
        }

        let frame = match ForwardFrame::decode(bytes) {
            Ok(Some(frame)) => frame,
            Ok(None) => return false,
            Err(err) => {
                log_debug!(
                    "{}: dropping bad frame from {}: {err}",
                    self.base.transport_id,
                    source.name
                );
                return false;
            }
        };

        let delivered = self.base.dispatch(&frame.channel, &frame.payload);

        if source.kind != self.role {
            self.relay_frame(source, &frame, bytes);
        }

        delivered
    }

    /// Destinations a frame from `source` is re-broadcast to.
    fn relay_targets(&self, source: &FrameSource, frame: &ForwardFrame) -> Vec<String> {
        // ---
        if matches!(self.relay, RelayPolicy::None) {
            return Vec::new();
        }
        if let Target::Server(name) = &frame.target {
            if *name == self.base.transport_id {
                return Vec::new();
            }
        }

        self.host
            .destinations()
            .into_iter()
            .filter(|dest| *dest != source.name)
            .filter(|dest| match &self.relay {
                RelayPolicy::None => false,
                RelayPolicy::All => true,
                RelayPolicy::Only(allowed) => allowed.contains(dest),
            })
            .filter(|dest| match &frame.target {
                Target::All => true,
                Target::Server(name) => name == dest,
            })
            .collect()
    }

    fn relay_frame(&self, source: &FrameSource, frame: &ForwardFrame, bytes: &[u8]) {
        // ---
        let targets = self.relay_targets(source, frame);
        if targets.is_empty() {
            return;
        }

        let raw = Bytes::copy_from_slice(bytes);
        for dest in &targets {
            if let Err(err) = self.host.dispatch(Some(dest), raw.clone()) {
                log_error!(
                    "{}: relay of {} to {dest} failed: {err}",
                    self.base.transport_id,
                    frame.channel
                );
            }
        }
        log_debug!(
            "{}: relayed {} from {} to {targets:?}",
            self.base.transport_id,
            frame.channel,
            source.name
        );
    }
}

#[async_trait::async_trait]
impl Transport for ForwardingBridge {
    // ---

    fn base(&self) -> &TransportBase {
        &self.base
    }

    async fn start(&self) -> Result<()> {
        self.base.set_enabled(true);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.base.set_enabled(false);
        Ok(())
    }

    async fn send(&self, channel: &str, payload: Bytes) -> Result<()> {
        // ---
        if !self.base.is_enabled() {
            return Ok(());
        }

        let frame = ForwardFrame::new(self.target.clone(), channel, payload).encode()?;
        let destination = match &self.target {
            Target::All => None,
            Target::Server(name) => Some(name.as_str()),
        };

        self.host.dispatch(destination, frame).map_err(|err| {
            log_error!("{}: forward on {channel} failed: {err}", self.base.transport_id);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::Inbound;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingHost {
        peers: Vec<String>,
        sent: Mutex<Vec<(Option<String>, Bytes)>>,
    }

    impl HostChannel for RecordingHost {
        fn dispatch(&self, destination: Option<&str>, frame: Bytes) -> Result<()> {
            self.sent.lock().push((destination.map(str::to_string), frame));
            Ok(())
        }

        fn destinations(&self) -> Vec<String> {
            self.peers.clone()
        }
    }

    #[derive(Default)]
    struct Sink(Mutex<Vec<(String, Vec<u8>)>>);

    impl Inbound for Sink {
        fn receive(&self, channel: &str, payload: &[u8]) -> bool {
            self.0.lock().push((channel.to_string(), payload.to_vec()));
            true
        }
    }

    fn host(peers: &[&str]) -> Arc<RecordingHost> {
        Arc::new(RecordingHost {
            peers: peers.iter().map(|p| p.to_string()).collect(),
            ..RecordingHost::default()
        })
    }

    async fn bridge(
        name: &str,
        role: BridgeRole,
        host: Arc<RecordingHost>,
        relay: RelayPolicy,
    ) -> (ForwardingBridge, Arc<Sink>) {
        let bridge = ForwardingBridge::new(name, role, host).with_relay(relay);
        let sink = Arc::new(Sink::default());
        bridge.base().attach(sink.clone());
        bridge.subscribe(&["sync"]).await.unwrap();
        bridge.start().await.unwrap();
        (bridge, sink)
    }

    fn frame(target: Target, channel: &str) -> Bytes {
        ForwardFrame::new(target, channel, Bytes::from_static(b"p"))
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_wraps_frame() {
        // ---
        let host = host(&[]);
        let (bridge, _) = bridge("b1", BridgeRole::Backend, host.clone(), RelayPolicy::None).await;

        bridge.send("sync", Bytes::from_static(b"hi")).await.unwrap();

        let sent = host.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, None);
        let decoded = ForwardFrame::decode(&sent[0].1).unwrap().unwrap();
        assert_eq!(decoded.target, Target::All);
        assert_eq!(decoded.channel, "sync");
        assert_eq!(&decoded.payload[..], b"hi");
    }

    #[tokio::test]
    async fn test_targeted_send_goes_to_one_destination() {
        // ---
        let host = host(&[]);
        let bridge = ForwardingBridge::new("b1", BridgeRole::Backend, host.clone())
            .with_target(Target::Server("proxy".into()));
        bridge.start().await.unwrap();

        bridge.send("sync", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(host.sent.lock()[0].0.as_deref(), Some("proxy"));
    }

    #[tokio::test]
    async fn test_closed_bridge_neither_sends_nor_dispatches() {
        // ---
        let host = host(&[]);
        let (bridge, sink) = bridge("b1", BridgeRole::Backend, host.clone(), RelayPolicy::None).await;
        bridge.close().await.unwrap();

        bridge.send("sync", Bytes::from_static(b"x")).await.unwrap();
        let source = FrameSource::new(BridgeRole::Proxy, "proxy");
        assert!(!bridge.handle_frame(&source, &frame(Target::All, "sync")));

        assert!(host.sent.lock().is_empty());
        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_only_subscribed_channels() {
        // ---
        let host = host(&[]);
        let (bridge, sink) = bridge("b1", BridgeRole::Backend, host, RelayPolicy::None).await;
        let source = FrameSource::new(BridgeRole::Proxy, "proxy");

        assert!(bridge.handle_frame(&source, &frame(Target::All, "sync")));
        assert!(!bridge.handle_frame(&source, &frame(Target::All, "other")));
        assert!(!bridge.handle_frame(&source, b"\x00\x01"));

        let seen = sink.0.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("sync".to_string(), b"p".to_vec()));
    }

    #[tokio::test]
    async fn test_proxy_relays_to_other_backends() {
        // ---
        let host = host(&["lobby", "game-1", "game-2"]);
        let (proxy, _) = bridge("proxy", BridgeRole::Proxy, host.clone(), RelayPolicy::All).await;

        let bytes = frame(Target::All, "sync");
        proxy.handle_frame(&FrameSource::new(BridgeRole::Backend, "lobby"), &bytes);

        let sent = host.sent.lock();
        let dests: Vec<_> = sent.iter().filter_map(|(d, _)| d.clone()).collect();
        assert_eq!(dests, vec!["game-1".to_string(), "game-2".to_string()]);
        assert!(sent.iter().all(|(_, b)| *b == bytes));
    }

    #[tokio::test]
    async fn test_relay_policy_subset_and_target() {
        // ---
        let host = host(&["lobby", "game-1", "game-2"]);
        let only: HashSet<String> = ["game-2".to_string(), "lobby".to_string()].into();
        let (proxy, _) =
            bridge("proxy", BridgeRole::Proxy, host.clone(), RelayPolicy::Only(only)).await;
        let from_game1 = FrameSource::new(BridgeRole::Backend, "game-1");

        proxy.handle_frame(&from_game1, &frame(Target::All, "sync"));
        proxy.handle_frame(&from_game1, &frame(Target::Server("lobby".into()), "sync"));
        proxy.handle_frame(&from_game1, &frame(Target::Server("proxy".into()), "sync"));

        let dests: Vec<_> = host
            .sent
            .lock()
            .iter()
            .filter_map(|(d, _)| d.clone())
            .collect();
        assert_eq!(
            dests,
            vec!["lobby".to_string(), "game-2".to_string(), "lobby".to_string()]
        );
    }

    #[tokio::test]
    async fn test_same_role_frames_are_not_relayed() {
        // ---
        let host = host(&["game-1", "game-2"]);
        let (proxy, sink) = bridge("proxy", BridgeRole::Proxy, host.clone(), RelayPolicy::All).await;

        assert!(proxy.handle_frame(
            &FrameSource::new(BridgeRole::Proxy, "proxy-2"),
            &frame(Target::All, "sync")
        ));

        assert_eq!(sink.0.lock().len(), 1);
        assert!(host.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_default_policy_relays_nothing() {
        // ---
        let host = host(&["game-1", "game-2"]);
        let (proxy, _) = bridge("proxy", BridgeRole::Proxy, host.clone(), RelayPolicy::None).await;

        proxy.handle_frame(
            &FrameSource::new(BridgeRole::Backend, "game-1"),
            &frame(Target::All, "sync"),
        );
        assert!(host.sent.lock().is_empty());
    }
}
