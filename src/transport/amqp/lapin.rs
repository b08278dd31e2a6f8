//! AMQP transport implementation using `lapin`.
//!
//! This module provides an implementation of the `Transport` trait backed by
//! an AMQP 0-9-1 broker (RabbitMQ). Every process publishes to one shared
//! **topic exchange** with the channel name as routing key, and consumes from
//! a private queue bound to that exchange once per subscribed channel.
//!
//! ## Broker topology
//!
//! - exchange: `config.exchange`, kind `topic`, auto-delete
//! - queue: server-named, exclusive, auto-delete; it disappears with the
//!   connection, so nothing accumulates while a process is down
//! - bindings: one per subscribed channel, routing key = channel name
//!
//! ## Connection behavior
//!
//! The first connection is made by `start()` and a failure is returned to
//! the caller. A **liveness task** then checks the connection and channel
//! every `liveness_interval`. When either has dropped it rebuilds the whole
//! topology at once; if that fails it keeps retrying every
//! `reconnect_delay`.
//!
//! A rebuild connects without holding the link lock. While it runs, `send()`
//! fails fast with "not connected" and `subscribe()` only records the
//! channel; the new link binds whatever was added before it is installed.
//!
//! ## Message delivery semantics
//!
//! - Deliveries are auto-acknowledged and dispatched by routing key.
//! - `unsubscribe()` does not remove the binding. Deliveries for channels no
//!   longer in the set are dropped locally; the stale binding goes away with
//!   the queue on the next reconnect.
//! - Delivery is best-effort and non-durable.

use lapin::{
    //
    options::{
        //
        BasicConsumeOptions,
        BasicPublishOptions,
        ExchangeDeclareOptions,
        QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
    ExchangeKind,
};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
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

/// One live connection with its channel, queue and consumer task.
struct Link {
    connection: Connection,
    channel: Channel,
    queue: String,
    bound: HashSet<String>,
    consumer: JoinHandle<()>,
}

struct Shared {
    // ---
    base: TransportBase,
    uri: String,
    exchange: String,
    reconnect_delay: Duration,
    liveness_interval: Duration,
    link: tokio::sync::Mutex<Option<Link>>,
    attempts: AtomicU32,
}

struct Worker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// AMQP transport implementation using lapin.
pub struct AmqpTransport {
    // ---
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

fn amqp_err(context: &str) -> impl Fn(lapin::Error) -> Error + '_ {
    move |err| Error::Transport(format!("amqp: {context}: {err}"))
}

impl Link {
    fn is_alive(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn teardown(self) {
        // ---
        self.consumer.abort();
        let _ = self.channel.close(200, "Normal shutdown").await;
        let _ = self.connection.close(200, "Normal shutdown").await;
    }
}

impl Shared {
    // ---

    /// Connect and declare the full topology for the current channel set.
    async fn setup(self: &Arc<Self>) -> Result<Link> {
        // ---
        let id = self.base.transport_id.as_str();

        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(amqp_err("connection failed"))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(amqp_err("channel creation failed"))?;

        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    auto_delete: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(amqp_err("exchange declare failed"))?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(amqp_err("queue declare failed"))?;
        let queue = queue.name().as_str().to_string();

        let mut bound = HashSet::new();
        for name in self.base.channels() {
            bind(&channel, &queue, &self.exchange, &name).await?;
            bound.insert(name);
        }

        let consumer = channel
            .basic_consume(
                &queue,
                &format!("{id}-consumer"),
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(amqp_err("consume failed"))?;

        log_info!("{id}: consuming {queue} on exchange {}", self.exchange);

        let shared = Arc::clone(self);
        let consumer = tokio::spawn(async move {
            let mut consumer = consumer;
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        shared
                            .base
                            .dispatch(delivery.routing_key.as_str(), &delivery.data);
                    }
                    Err(err) => {
                        log_warn!("{}: consumer error: {err}", shared.base.transport_id);
                        break;
                    }
                }
            }
            log_debug!("{}: consumer ended", shared.base.transport_id);
        });

        Ok(Link {
            connection,
            channel,
            queue,
            bound,
            consumer,
        })
    }

    async fn is_alive(&self) -> bool {
        self.link.lock().await.as_ref().is_some_and(Link::is_alive)
    }

    /// Replace the current link with a freshly built one.
    ///
    /// The lock is only held to take the old link out and to put the new one
    /// in, never across the connect.
    async fn reconnect(self: &Arc<Self>) -> Result<()> {
        // ---
        let old = self.link.lock().await.take();
        if let Some(old) = old {
            old.teardown().await;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        log_debug!("{}: broker connect attempt {attempt}", self.base.transport_id);
        let mut link = self.setup().await?;

        let mut slot = self.link.lock().await;

        // channels subscribed while setup was running
        for name in self.base.channels() {
            if link.bound.contains(&name) {
                continue;
            }
            if let Err(err) = bind(&link.channel, &link.queue, &self.exchange, &name).await {
                drop(slot);
                link.teardown().await;
                return Err(err);
            }
            link.bound.insert(name);
        }

        let stale = slot.replace(link);
        drop(slot);
        if let Some(stale) = stale {
            stale.teardown().await;
        }
        Ok(())
    }

    async fn shutdown_link(&self) {
        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.teardown().await;
        }
    }
}

async fn bind(channel: &Channel, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
    // ---
    channel
        .queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(amqp_err("queue bind failed"))
}

/// Liveness worker: rebuilds the link whenever it is found dead.
async fn run_liveness(shared: Arc<Shared>, cancel: CancellationToken) {
    // ---
    let id = shared.base.transport_id.clone();
    let period = shared.liveness_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut backoff = Backoff::new(shared.reconnect_delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if shared.is_alive().await {
            continue;
        }

        log_warn!("{id}: broker connection lost, reconnecting");
        loop {
            let wait = backoff.next_delay();
            if !wait.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            match shared.reconnect().await {
                Ok(()) => {
                    log_info!("{id}: broker connection restored");
                    backoff.reset();
                    break;
                }
                Err(err) => {
                    log_warn!(
                        "{id}: {err} (failure {}), retrying in {:?}",
                        backoff.failures(),
                        shared.reconnect_delay
                    );
                }
            }
        }
    }

    log_debug!("{id}: liveness worker stopped");
}

impl AmqpTransport {
    // ---

    fn create(config: &TransportConfig) -> Result<Self> {
        // ---
        if config.liveness_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "amqp liveness_interval must be non-zero".into(),
            ));
        }
        if config.exchange.is_empty() {
            return Err(Error::MissingConfig("amqp exchange name".into()));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                base: TransportBase::new(config.node_id.clone()),
                uri: config.uri.clone(),
                exchange: config.exchange.clone(),
                reconnect_delay: config.reconnect_delay,
                liveness_interval: config.liveness_interval,
                link: tokio::sync::Mutex::new(None),
                attempts: AtomicU32::new(0),
            }),
            worker: Mutex::new(None),
        })
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
impl Transport for AmqpTransport {
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

        log_info!("{id}: connecting to AMQP broker {}", shared.uri);
        shared.reconnect().await.map_err(|err| {
            log_error!("{id}: {err}");
            err
        })?;

        shared.base.set_enabled(true);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_liveness(Arc::clone(shared), cancel.clone()));
        *self.worker.lock() = Some(Worker { cancel, task });

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.shared.base.set_enabled(false);
        self.stop_worker().await;
        self.shared.shutdown_link().await;

        log_debug!("{}: amqp transport closed", self.shared.base.transport_id);
        Ok(())
    }

    /// Record the channels and bind the new ones on the live queue.
    async fn subscribe(&self, channels: &[&str]) -> Result<()> {
        // ---
        let base = &self.shared.base;
        base.add_channels(channels);

        let mut slot = self.shared.link.lock().await;
        if let Some(link) = slot.as_mut() {
            for name in channels.iter().copied() {
                if link.bound.contains(name) {
                    continue;
                }
                bind(&link.channel, &link.queue, &self.shared.exchange, name)
                    .await
                    .map_err(|err| {
                        log_error!("{}: {err}", base.transport_id);
                        err
                    })?;
                link.bound.insert(name.to_string());
                log_debug!("{}: bound {name}", base.transport_id);
            }
        }
        Ok(())
    }

    async fn send(&self, channel: &str, payload: Bytes) -> Result<()> {
        // ---
        if !self.shared.base.is_enabled() {
            return Ok(());
        }

        let amqp_channel = self
            .shared
            .link
            .lock()
            .await
            .as_ref()
            .map(|link| link.channel.clone())
            .ok_or_else(|| Error::Transport("amqp: not connected".into()))?;

        amqp_channel
            .basic_publish(
                &self.shared.exchange,
                channel, // routing key = channel name
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(amqp_err("publish failed"))
            .map(|_confirm| ())
            .map_err(|err| {
                log_error!("{}: {err}", self.shared.base.transport_id);
                err
            })
    }
}

/// Creates a lapin-based AMQP transport from the given configuration.
///
/// # Errors
///
/// Returns an error if `liveness_interval` is zero or `exchange` is empty.
///
/// # Connection Behavior
///
/// Nothing is opened until `start()`.
pub async fn create_transport(config: TransportConfig) -> Result<TransportPtr> {
    // ---
    log_debug!("{}: create amqp transport for {}", config.node_id, config.uri);
    Ok(Arc::new(AmqpTransport::create(&config)?))
}
