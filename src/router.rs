//! Consumer registry and duplicate suppression.
//!
//! The router is the inbound half of a [`Messenger`](crate::Messenger): it is
//! attached to the active transport as its [`Inbound`] sink, decodes every
//! envelope, drops ids it has already seen and fans the payload out to the
//! consumers registered for the channel.
//!
//! It is kept separate from the messenger so the transport can hold it
//! without creating a reference cycle back to its owner.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{log_debug, log_error, Envelope, ExpiringSet, Inbound};

/// A callback receiving decoded payloads for one channel.
pub trait Consumer: Send + Sync {
    fn consume(&self, message: &str);
}

impl<F> Consumer for F
where
    F: Fn(&str) + Send + Sync,
{
    fn consume(&self, message: &str) {
        self(message)
    }
}

/// Shared consumer pointer. Registration identity is the pointer itself.
pub type ConsumerPtr = Arc<dyn Consumer>;

/// Wrap a closure as a [`ConsumerPtr`].
pub fn consumer<F>(f: F) -> ConsumerPtr
where
    F: Fn(&str) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_consumer(a: &ConsumerPtr, b: &ConsumerPtr) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

pub(crate) struct Router {
    consumers: RwLock<HashMap<String, Vec<ConsumerPtr>>>,
    seen: ExpiringSet<i32>,
}

impl Router {
    // ---

    pub(crate) fn new(seen: ExpiringSet<i32>) -> Self {
        Self {
            consumers: RwLock::new(HashMap::new()),
            seen,
        }
    }

    /// Register `consumer` on `channel`; `false` if it was already registered.
    pub(crate) fn register(&self, channel: &str, consumer: ConsumerPtr) -> bool {
        // ---
        let mut map = self.consumers.write();
        let list = map.entry(channel.to_string()).or_default();
        if list.iter().any(|c| same_consumer(c, &consumer)) {
            return false;
        }
        list.push(consumer);
        true
    }

    /// Remove `consumer` from `channel`.
    ///
    /// Returns `(removed, channel_now_empty)`.
    pub(crate) fn deregister(&self, channel: &str, consumer: &ConsumerPtr) -> (bool, bool) {
        // ---
        let mut map = self.consumers.write();
        let Some(list) = map.get_mut(channel) else {
            return (false, true);
        };

        let before = list.len();
        list.retain(|c| !same_consumer(c, consumer));
        let removed = list.len() != before;

        let empty = list.is_empty();
        if empty {
            map.remove(channel);
        }
        (removed, empty)
    }

    pub(crate) fn deregister_all(&self, channel: &str) -> bool {
        self.consumers.write().remove(channel).is_some()
    }

    pub(crate) fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.consumers.read().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Remember an id we are about to send so its echo is suppressed.
    pub(crate) fn mark_sent(&self, id: i32) {
        self.seen.add(id);
    }

    pub(crate) fn clear(&self) {
        self.consumers.write().clear();
        self.seen.clear();
    }
}

impl Inbound for Router {
    fn receive(&self, channel: &str, payload: &[u8]) -> bool {
        // ---
        let env = match Envelope::decode(payload) {
            Ok(env) => env,
            Err(_) => return false,
        };

        if self.seen.contains_or_add(env.id) {
            log_debug!("suppressed duplicate message {} on {channel}", env.id);
            return false;
        }

        let consumers = self.consumers.read().get(channel).cloned();

        for consumer in consumers.iter().flatten() {
            let result = catch_unwind(AssertUnwindSafe(|| consumer.consume(&env.payload)));
            if result.is_err() {
                log_error!("consumer on channel {channel} panicked");
            }
        }

        true
    }
}
