//! Polling transport over a shared SQL table.
//!
//! Every process appends outgoing messages as rows and periodically reads the
//! rows it has not seen yet. No long-lived subscription is required; latency
//! is bounded by the poll period.
//!
//! ## State machine
//!
//! `Stopped -> Starting -> Polling -> Stopped`
//!
//! `start()` opens the database, creates the table if needed and takes the
//! current maximum row id as its cursor, so history is never replayed. It then
//! enables the transport and spawns two periodic workers:
//!
//! - **poll** (`poll_interval`, 1s): rows with `id > cursor` younger than
//!   `poll_window` (30s) are dispatched in ascending id order and the cursor
//!   advances to the highest id seen.
//! - **cleanup** (`cleanup_interval`, 30s): rows older than `retention` (60s)
//!   are deleted.
//!
//! ## Gate
//!
//! `send`, poll and cleanup all hold the *read* side of one `RwLock`. They may
//! overlap each other; the lock only lets `close()` take the write side and
//! know that nothing is mid-flight before the connection is dropped. Mutual
//! exclusion between concurrent readers and writers is left to the database,
//! which isolates rows itself. A backend without row-level isolation would
//! need the writer to take the write side instead.
//!
//! ## Failures
//!
//! A failed query is logged and skipped; the worker simply tries again on its
//! next tick. Only the initial open in `start()` propagates an error.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::store::{database_path, MessageStore};
use crate::{
    //
    log_debug,
    log_error,
    log_info,
    Error,
    Result,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

struct Shared {
    base: TransportBase,
    store: MessageStore,
    cursor: AtomicI64,
    gate: RwLock<()>,
    poll_interval: Duration,
    cleanup_interval: Duration,
    poll_window: Duration,
    retention: Duration,
}

struct Workers {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// SQL polling implementation of the `Transport` trait.
pub struct SqlTransport {
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
}

impl Shared {
    // ---

    async fn poll_once(self: &Arc<Self>) {
        // ---
        let _gate = self.gate.read().await;
        if !self.base.is_enabled() {
            return;
        }

        let cursor = self.cursor.load(Ordering::Acquire);
        let since = now_millis() - millis(self.poll_window);

        let rows = match self
            .store
            .run(move |store| store.fetch_since(cursor, since))
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                log_error!("{}: poll failed: {err}", self.base.transport_id);
                return;
            }
        };

        let mut highest = cursor;
        for row in rows {
            highest = highest.max(row.id);

            if !self.base.is_subscribed(&row.channel) {
                continue;
            }
            match BASE64.decode(row.msg.as_bytes()) {
                Ok(payload) => {
                    self.base.dispatch(&row.channel, &payload);
                }
                Err(err) => {
                    log_debug!(
                        "{}: row {} on {} is not base64: {err}",
                        self.base.transport_id,
                        row.id,
                        row.channel
                    );
                }
            }
        }

        self.cursor.fetch_max(highest, Ordering::AcqRel);
    }

    async fn cleanup_once(self: &Arc<Self>) {
        // ---
        let _gate = self.gate.read().await;
        if !self.base.is_enabled() {
            return;
        }

        let before = now_millis() - millis(self.retention);
        match self.store.run(move |store| store.purge(before)).await {
            Ok(0) => {}
            Ok(removed) => {
                log_debug!("{}: removed {removed} expired row(s)", self.base.transport_id);
            }
            Err(err) => {
                log_error!("{}: cleanup failed: {err}", self.base.transport_id);
            }
        }
    }
}

/// Run `tick` every `period` until `cancel` fires. The first tick happens
/// one full period after spawn.
fn spawn_periodic<F, Fut>(
    shared: Arc<Shared>,
    period: Duration,
    cancel: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Shared>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        // ---
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => tick(Arc::clone(&shared)).await,
            }
        }
    })
}

impl SqlTransport {
    // ---

    fn create(config: &TransportConfig) -> Result<Self> {
        // ---
        if config.poll_interval.is_zero() || config.cleanup_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "sql transport intervals must be non-zero".into(),
            ));
        }

        let path = database_path(&config.uri)?;
        let store = MessageStore::new(path, config.table.clone())?;

        Ok(Self {
            shared: Arc::new(Shared {
                base: TransportBase::new(config.node_id.clone()),
                store,
                cursor: AtomicI64::new(0),
                gate: RwLock::new(()),
                poll_interval: config.poll_interval,
                cleanup_interval: config.cleanup_interval,
                poll_window: config.poll_window,
                retention: config.retention,
            }),
            workers: Mutex::new(None),
        })
    }

    async fn stop_workers(&self) {
        // ---
        let workers = self.workers.lock().take();
        if let Some(workers) = workers {
            workers.cancel.cancel();
            for task in workers.tasks {
                let _ = task.await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for SqlTransport {
    // ---

    fn base(&self) -> &TransportBase {
        &self.shared.base
    }

    async fn start(&self) -> Result<()> {
        // ---
        let shared = &self.shared;
        let id = shared.base.transport_id.as_str();

        if shared.base.is_enabled() {
            self.close().await?;
        }

        let max_id = shared
            .store
            .run(|store| {
                store.open()?;
                store.max_id()
            })
            .await
            .map_err(|err| {
                log_error!("{id}: failed to open message table: {err}");
                err
            })?;

        shared.cursor.store(max_id, Ordering::Release);
        shared.base.set_enabled(true);

        let cancel = CancellationToken::new();
        let poll = spawn_periodic(
            Arc::clone(shared),
            shared.poll_interval,
            cancel.clone(),
            |s| async move { s.poll_once().await },
        );
        let cleanup = spawn_periodic(
            Arc::clone(shared),
            shared.cleanup_interval,
            cancel.clone(),
            |s| async move { s.cleanup_once().await },
        );

        *self.workers.lock() = Some(Workers {
            cancel,
            tasks: vec![poll, cleanup],
        });

        log_info!("{id}: sql transport polling from row {max_id}");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.shared.base.set_enabled(false);
        self.stop_workers().await;

        let _gate = self.shared.gate.write().await;
        self.shared.store.close();

        log_debug!("{}: sql transport closed", self.shared.base.transport_id);
        Ok(())
    }

    async fn send(&self, channel: &str, payload: Bytes) -> Result<()> {
        // ---
        let _gate = self.shared.gate.read().await;
        if !self.shared.base.is_enabled() {
            return Ok(());
        }

        let channel_owned = channel.to_string();
        let encoded = BASE64.encode(&payload);
        let time = now_millis();

        self.shared
            .store
            .run(move |store| store.insert(time, &channel_owned, &encoded))
            .await
            .map_err(|err| {
                log_error!("{}: insert on {channel} failed: {err}", self.shared.base.transport_id);
                err
            })
    }
}

/// Creates a SQL polling transport from the given configuration.
///
/// The database is not touched until `start()`.
///
/// # Errors
///
/// Returns an error if the URI has no database path or the table name is not
/// a plain SQL identifier.
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    Ok(Arc::new(SqlTransport::create(&config)?))
}
