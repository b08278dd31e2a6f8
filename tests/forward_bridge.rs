// tests/forward_bridge.rs
//
// A proxy and three backends wired together through an in-test host pipe.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;

use common::{init_logging, Inbox};

use mom_messenger::{
    // ---
    BridgeRole,
    ForwardingBridge,
    FrameSource,
    HostChannel,
    Messenger,
    RelayPolicy,
    Result,
    Target,
    TransportPtr,
};

/// Every node's bridge, by name.
#[derive(Default)]
struct Network {
    nodes: RwLock<HashMap<String, (BridgeRole, Weak<ForwardingBridge>)>>,
}

/// Host pipe of one node. A backend only reaches the proxy; the proxy
/// reaches every backend.
struct Pipe {
    name: String,
    role: BridgeRole,
    network: Arc<Network>,
}

impl Pipe {
    fn peers(&self) -> Vec<(String, Arc<ForwardingBridge>)> {
        let mut peers: Vec<_> = self
            .network
            .nodes
            .read()
            .iter()
            .filter(|(name, (role, _))| **name != self.name && *role != self.role)
            .filter_map(|(name, (_, bridge))| bridge.upgrade().map(|b| (name.clone(), b)))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers
    }
}

impl HostChannel for Pipe {
    fn dispatch(&self, destination: Option<&str>, frame: Bytes) -> Result<()> {
        let source = FrameSource::new(self.role, self.name.clone());
        for (name, bridge) in self.peers() {
            if destination.map_or(true, |d| d == name) {
                bridge.handle_frame(&source, &frame);
            }
        }
        Ok(())
    }

    fn destinations(&self) -> Vec<String> {
        self.peers().into_iter().map(|(name, _)| name).collect()
    }
}

struct Node {
    messenger: Messenger,
    inbox: Inbox,
    _bridge: Arc<ForwardingBridge>,
}

async fn node(network: &Arc<Network>, name: &str, role: BridgeRole, relay: RelayPolicy) -> Node {
    let pipe = Arc::new(Pipe {
        name: name.to_string(),
        role,
        network: Arc::clone(network),
    });
    let bridge = Arc::new(ForwardingBridge::new(name, role, pipe).with_relay(relay));
    network
        .nodes
        .write()
        .insert(name.to_string(), (role, Arc::downgrade(&bridge)));

    let inbox = Inbox::new();
    let messenger = Messenger::new();
    messenger.subscribe("sync", inbox.consumer()).await.unwrap();

    let transport: TransportPtr = bridge.clone();
    messenger.start(transport).await.unwrap();

    Node {
        messenger,
        inbox,
        _bridge: bridge,
    }
}

#[tokio::test]
async fn bridge_proxy_relays_between_backends() {
    // ---
    // Arrange
    // ---
    init_logging();
    let network = Arc::new(Network::default());
    let proxy = node(&network, "proxy", BridgeRole::Proxy, RelayPolicy::All).await;
    let lobby = node(&network, "lobby", BridgeRole::Backend, RelayPolicy::None).await;
    let game1 = node(&network, "game-1", BridgeRole::Backend, RelayPolicy::None).await;
    let game2 = node(&network, "game-2", BridgeRole::Backend, RelayPolicy::None).await;

    // ---
    // Act
    // ---
    assert!(lobby.messenger.send("sync", "reload").await);

    // ---
    // Assert
    // ---
    let reload = vec!["reload".to_string()];
    assert_eq!(proxy.inbox.messages(), reload);
    assert_eq!(game1.inbox.messages(), reload);
    assert_eq!(game2.inbox.messages(), reload);
    assert!(lobby.inbox.messages().is_empty());
}

#[tokio::test]
async fn bridge_proxy_broadcast_reaches_backends_once() {
    // ---
    init_logging();
    let network = Arc::new(Network::default());
    let proxy = node(&network, "proxy", BridgeRole::Proxy, RelayPolicy::All).await;
    let game1 = node(&network, "game-1", BridgeRole::Backend, RelayPolicy::None).await;
    let game2 = node(&network, "game-2", BridgeRole::Backend, RelayPolicy::None).await;

    assert!(proxy.messenger.send("sync", "from proxy").await);

    assert_eq!(game1.inbox.messages(), vec!["from proxy".to_string()]);
    assert_eq!(game2.inbox.messages(), vec!["from proxy".to_string()]);
    assert!(proxy.inbox.messages().is_empty());
}

#[tokio::test]
async fn bridge_relay_subset_only() {
    // ---
    init_logging();
    let network = Arc::new(Network::default());
    let only = RelayPolicy::Only(["game-2".to_string()].into());
    let _proxy = node(&network, "proxy", BridgeRole::Proxy, only).await;
    let lobby = node(&network, "lobby", BridgeRole::Backend, RelayPolicy::None).await;
    let game1 = node(&network, "game-1", BridgeRole::Backend, RelayPolicy::None).await;
    let game2 = node(&network, "game-2", BridgeRole::Backend, RelayPolicy::None).await;

    assert!(lobby.messenger.send("sync", "partial").await);

    assert!(game1.inbox.messages().is_empty());
    assert_eq!(game2.inbox.messages(), vec!["partial".to_string()]);
}

#[tokio::test]
async fn bridge_targeted_send_skips_relay() {
    // ---
    init_logging();
    let network = Arc::new(Network::default());
    let pipe = Arc::new(Pipe {
        name: "lobby".to_string(),
        role: BridgeRole::Backend,
        network: Arc::clone(&network),
    });
    let proxy = node(&network, "proxy", BridgeRole::Proxy, RelayPolicy::All).await;
    let game1 = node(&network, "game-1", BridgeRole::Backend, RelayPolicy::None).await;

    let lobby = Arc::new(
        ForwardingBridge::new("lobby", BridgeRole::Backend, pipe)
            .with_target(Target::Server("proxy".to_string())),
    );
    network.nodes.write().insert(
        "lobby".to_string(),
        (BridgeRole::Backend, Arc::downgrade(&lobby)),
    );
    let messenger = Messenger::new();
    let transport: TransportPtr = lobby.clone();
    messenger.start(transport).await.unwrap();

    assert!(messenger.send("sync", "proxy only").await);

    assert_eq!(proxy.inbox.messages(), vec!["proxy only".to_string()]);
    assert!(game1.inbox.messages().is_empty());
}
