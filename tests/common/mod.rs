// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use mom_messenger::{consumer, ConsumerPtr};

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}

/// Consumer that records every payload it is handed.
#[derive(Clone, Default)]
pub struct Inbox {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumer(&self) -> ConsumerPtr {
        let seen = Arc::clone(&self.seen);
        consumer(move |payload| seen.lock().push(payload.to_string()))
    }

    pub fn messages(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Wait until at least `count` messages arrived or `limit` passes.
    pub async fn wait_for(&self, count: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.len() >= count
    }
}
