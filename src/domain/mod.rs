//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! transport implementations, protocols, or infrastructure concerns.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod envelope;
mod transport;

// --- Envelope re-exports ---

pub use envelope::{
    //
    get_blob,
    get_utf,
    put_blob,
    put_utf,
    Envelope,
    MAX_MESSAGE_ID,
    MAX_UTF_LEN,
};

// --- Transport domain re-exports ---

pub use transport::{
    //
    Inbound,
    Transport,
    TransportBase,
    TransportPtr,
};
