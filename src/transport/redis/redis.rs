//! Redis Pub/Sub transport implementation using `redis`.
//!
//! This module provides an implementation of the `Transport` trait backed by
//! Redis Pub/Sub. Delivery is immediate, best-effort and non-durable; a
//! process that is disconnected when a message is published never sees it.
//!
//! ## Two connections required
//!
//! Redis mandates a dedicated connection for Pub/Sub: a connection in
//! Pub/Sub mode cannot issue regular commands like `PUBLISH`. Two async
//! connections are therefore maintained:
//!
//! - `publish_conn`: a `MultiplexedConnection`, used only for `PUBLISH`.
//!   It is opened lazily again after it drops.
//! - the subscriber connection: an `aio::PubSub` split into a sink (for
//!   `SUBSCRIBE`/`UNSUBSCRIBE`) and a stream (for incoming messages). It is
//!   owned by a single background worker task.
//!
//! ## Subscription changes
//!
//! The worker blocks on the message stream. `subscribe()` and
//! `unsubscribe()` only edit the channel set and bump a *generation*
//! counter carried by a `watch` channel; the worker wakes on the change and
//! reconciles the server-side subscription with the current set. Changes
//! made while the worker is reconnecting are picked up by the fresh
//! subscribe of the next session.
//!
//! ## Reconnect policy
//!
//! The first connection attempt happens inside `start()` and its error is
//! returned to the caller. After that the worker never exits on a backend
//! error: the first failure since `start()` is retried at once, every later
//! failure is logged and retried after `reconnect_delay`.
//!
//! ## Authentication
//!
//! A `PUBLISH` rejected with `NOAUTH` is retried exactly once after sending
//! `AUTH` with the configured password.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use redis::aio::{MultiplexedConnection, PubSubSink, PubSubStream};
use redis::{Msg, RedisError, RedisResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::Backoff;
use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
    Error,
    Result,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};

/// The command half of a subscriber connection.
#[async_trait::async_trait]
trait ChannelSink: Send {
    async fn subscribe_channels(&mut self, channels: Vec<String>) -> RedisResult<()>;
    async fn unsubscribe_channels(&mut self, channels: Vec<String>) -> RedisResult<()>;
}

#[async_trait::async_trait]
impl ChannelSink for PubSubSink {
    async fn subscribe_channels(&mut self, channels: Vec<String>) -> RedisResult<()> {
        self.subscribe(channels).await
    }

    async fn unsubscribe_channels(&mut self, channels: Vec<String>) -> RedisResult<()> {
        self.unsubscribe(channels).await
    }
}

/// One subscriber connection: its sink and stream, what the server believes
/// we are subscribed to on it, and the generation it was last synced at.
///
/// The receiver is created before the first sync and travels with the
/// session into the worker, so a change made between `start()` and the
/// worker's first poll is still seen as pending.
struct Session<K, S> {
    sink: K,
    stream: S,
    current: HashSet<String>,
    generation: watch::Receiver<u64>,
}

struct Shared {
    // ---
    base: TransportBase,
    client: redis::Client,
    password: Option<String>,
    reconnect_delay: Duration,
    publish_conn: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    generation: watch::Sender<u64>,
}

struct Worker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Redis Pub/Sub implementation of the `Transport` trait.
pub struct RedisTransport {
    // ---
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

fn redis_err(context: &str, err: RedisError) -> Error {
    Error::Transport(format!("redis: {context}: {err}"))
}

impl Shared {
    // ---

    /// Open a subscriber connection and subscribe it to the current set.
    async fn connect_session(&self) -> Result<Session<PubSubSink, PubSubStream>> {
        // ---
        let pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|err| redis_err("subscriber connect", err))?;

        let (sink, stream) = pubsub.split();
        self.open_session(sink, stream).await
    }

    /// Wrap a split connection in a session synced to the current set.
    async fn open_session<K, S>(&self, sink: K, stream: S) -> Result<Session<K, S>>
    where
        K: ChannelSink,
    {
        // ---
        let mut session = Session {
            sink,
            stream,
            current: HashSet::new(),
            generation: self.generation.subscribe(),
        };

        self.sync_channels(&mut session.sink, &mut session.current, &mut session.generation)
            .await?;
        Ok(session)
    }

    /// Bring the server-side subscription behind `sink` in line with the
    /// channel set.
    async fn sync_channels<K: ChannelSink>(
        &self,
        sink: &mut K,
        current: &mut HashSet<String>,
        generation: &mut watch::Receiver<u64>,
    ) -> Result<()> {
        // ---
        let id = self.base.transport_id.as_str();

        // Mark first so a change racing with the read below wakes us again.
        generation.borrow_and_update();
        let wanted: HashSet<String> = self.base.channels().into_iter().collect();

        let mut removed: Vec<String> = current.difference(&wanted).cloned().collect();
        let mut added: Vec<String> = wanted.difference(current).cloned().collect();
        removed.sort();
        added.sort();

        if !removed.is_empty() {
            sink.unsubscribe_channels(removed.clone())
                .await
                .map_err(|err| redis_err("unsubscribe", err))?;
            log_debug!("{id}: unsubscribed from {removed:?}");
        }

        if !added.is_empty() {
            sink.subscribe_channels(added.clone())
                .await
                .map_err(|err| redis_err("subscribe", err))?;
            log_info!("{id}: subscribed to {added:?}");
        }

        *current = wanted;
        Ok(())
    }

    /// Pump one session until cancelled (`Ok`) or the connection is lost.
    async fn drive<K, S>(&self, session: Session<K, S>, cancel: &CancellationToken) -> Result<()>
    where
        K: ChannelSink,
        S: Stream<Item = Msg> + Unpin,
    {
        // ---
        let Session {
            mut sink,
            mut stream,
            mut current,
            mut generation,
        } = session;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),

                changed = generation.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    self.sync_channels(&mut sink, &mut current, &mut generation).await?;
                }

                maybe_msg = stream.next() => match maybe_msg {
                    Some(msg) => {
                        self.base.dispatch(msg.get_channel_name(), msg.get_payload_bytes());
                    }
                    None => {
                        return Err(Error::Transport("redis: subscriber stream ended".into()));
                    }
                },
            }
        }
    }

    /// Clone of the publish connection, opening it if needed.
    async fn publish_connection(&self) -> Result<MultiplexedConnection> {
        // ---
        let mut slot = self.publish_conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| redis_err("publish connect", err))?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn drop_publish_connection(&self) {
        self.publish_conn.lock().await.take();
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        // ---
        let id = self.base.transport_id.as_str();
        let mut conn = self.publish_connection().await?;

        let err = match publish_once(&mut conn, channel, payload).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if err.code() == Some("NOAUTH") {
            if let Some(password) = self.password.as_deref() {
                log_warn!("{id}: publish rejected with NOAUTH, re-authenticating");
                redis::cmd("AUTH")
                    .arg(password)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(|err| redis_err("auth", err))?;

                return publish_once(&mut conn, channel, payload)
                    .await
                    .map_err(|err| redis_err("publish after auth", err));
            }
        }

        if err.is_connection_dropped() || err.is_io_error() {
            self.drop_publish_connection().await;
        }
        Err(redis_err("publish", err))
    }
}

async fn publish_once(
    conn: &mut MultiplexedConnection,
    channel: &str,
    payload: &[u8],
) -> std::result::Result<(), RedisError> {
    // ---
    redis::cmd("PUBLISH")
        .arg(channel)
        .arg(payload)
        .query_async::<i64>(conn)
        .await
        .map(|_| ())
}

/// Subscriber worker: drives sessions and reconnects until cancelled.
///
/// Only the first failure since `start()` is retried at once; the backoff
/// is never reset.
async fn run_worker(
    shared: Arc<Shared>,
    first: Session<PubSubSink, PubSubStream>,
    cancel: CancellationToken,
) {
    // ---
    let id = shared.base.transport_id.clone();
    let mut session = Some(first);
    let mut backoff = Backoff::new(shared.reconnect_delay);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let result = match session.take() {
            Some(current) => shared.drive(current, &cancel).await,
            None => match shared.connect_session().await {
                Ok(fresh) => {
                    log_info!("{id}: subscriber reconnected");
                    shared.drive(fresh, &cancel).await
                }
                Err(err) => Err(err),
            },
        };

        let Err(err) = result else {
            break;
        };

        let wait = backoff.next_delay();
        if wait.is_zero() {
            log_debug!("{id}: {err}, reconnecting");
            continue;
        }

        log_warn!("{id}: {err}, reconnecting in {wait:?}");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    log_debug!("{id}: subscriber worker stopped");
}

impl RedisTransport {
    // ---

    fn create(config: &TransportConfig) -> Result<Self> {
        // ---
        let client = redis::Client::open(config.uri.as_str())
            .map_err(|err| Error::InvalidConfig(format!("redis uri {:?}: {err}", config.uri)))?;
        let (generation, _) = watch::channel(0);

        Ok(Self {
            shared: Arc::new(Shared {
                base: TransportBase::new(config.node_id.clone()),
                client,
                password: config.password.clone(),
                reconnect_delay: config.reconnect_delay,
                publish_conn: tokio::sync::Mutex::new(None),
                generation,
            }),
            worker: Mutex::new(None),
        })
    }

    fn bump_generation(&self) {
        self.shared.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    async fn stop_worker(&self) {
        // ---
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            let _ = worker.task.await;
        }
    }
}

#[async_trait::async_trait]
impl Transport for RedisTransport {
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

        shared.publish_connection().await.map_err(|err| {
            log_error!("{id}: {err}");
            err
        })?;

        let session = match shared.connect_session().await {
            Ok(session) => session,
            Err(err) => {
                log_error!("{id}: {err}");
                shared.drop_publish_connection().await;
                return Err(err);
            }
        };

        shared.base.set_enabled(true);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_worker(Arc::clone(shared), session, cancel.clone()));
        *self.worker.lock() = Some(Worker { cancel, task });

        log_info!("{id}: redis transport started");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.shared.base.set_enabled(false);
        self.stop_worker().await;
        self.shared.drop_publish_connection().await;

        log_debug!("{}: redis transport closed", self.shared.base.transport_id);
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<()> {
        // ---
        if self.shared.base.add_channels(channels) {
            self.bump_generation();
        }
        Ok(())
    }

    async fn unsubscribe(&self, channels: &[&str]) -> Result<()> {
        // ---
        if self.shared.base.remove_channels(channels) {
            self.bump_generation();
        }
        Ok(())
    }

    async fn send(&self, channel: &str, payload: Bytes) -> Result<()> {
        // ---
        if !self.shared.base.is_enabled() {
            return Ok(());
        }

        self.shared.publish(channel, &payload).await.map_err(|err| {
            log_error!("{}: {err}", self.shared.base.transport_id);
            err
        })
    }

    fn clear(&self) {
        self.shared.base.clear_channels();
        self.bump_generation();
    }
}

/// Creates a Redis Pub/Sub transport from the given configuration.
///
/// No connection is made until `start()`.
///
/// # Errors
///
/// Returns an error if the URI cannot be parsed as a Redis connection URL.
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create redis transport for {}", config.node_id, config.uri);
    Ok(Arc::new(RedisTransport::create(&config)?))
}
