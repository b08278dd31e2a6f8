//! Forwarding bridge over a host-provided pipe.
//!
//! Unlike the other backends this one is always compiled: it has no
//! third-party dependency and no connection of its own.

mod bridge;
mod frame;

pub use bridge::{
    //
    BridgeRole,
    ForwardingBridge,
    FrameSource,
    HostChannel,
    RelayPolicy,
};

pub use frame::{
    //
    ForwardFrame,
    Target,
    FORWARD_SUBCHANNEL,
    TARGET_ALL,
};
