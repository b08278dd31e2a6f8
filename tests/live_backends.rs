// tests/live_backends.rs
//
// Need a running server; run with e.g.
//   REDIS_URL=redis://127.0.0.1:6379 AMQP_URL=amqp://127.0.0.1:5672/%2f \
//       cargo test --test live_backends -- --ignored

mod common;

use std::time::Duration;

use common::{init_logging, Inbox};

use mom_messenger::{
    // ---
    Messenger,
    TransportBuilder,
};

const WAIT: Duration = Duration::from_secs(10);

#[allow(dead_code)]
async fn exchange_between_two_nodes(uri: &str, channel: &str) {
    // ---
    init_logging();

    let inbox_a = Inbox::new();
    let inbox_b = Inbox::new();
    let a = Messenger::new();
    let b = Messenger::new();
    a.subscribe(channel, inbox_a.consumer()).await.unwrap();

    for (messenger, id) in [(&a, "live-a"), (&b, "live-b")] {
        let transport = TransportBuilder::new()
            .uri(uri)
            .node_id(id)
            .build()
            .await
            .unwrap();
        messenger.start(transport).await.expect("start failed");
    }

    // subscribing after start has to reach the server too
    b.subscribe(channel, inbox_b.consumer()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(a.send(channel, "ping").await);
    assert!(inbox_b.wait_for(1, WAIT).await, "b never received ping");

    assert!(b.send(channel, "pong").await);
    assert!(inbox_a.wait_for(1, WAIT).await, "a never received pong");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(inbox_a.messages(), vec!["pong".to_string()]);
    assert_eq!(inbox_b.messages(), vec!["ping".to_string()]);

    // after unsubscribing, b no longer delivers
    b.unsubscribe_all(channel).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(a.send(channel, "late").await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(inbox_b.len(), 1);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[cfg(feature = "transport_redis")]
#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a Redis server at REDIS_URL"]
async fn redis_live_exchange() {
    // ---
    let uri = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
    exchange_between_two_nodes(&uri, "mom-messenger-live").await;
}

#[cfg(feature = "transport_amqp")]
#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs an AMQP broker at AMQP_URL"]
async fn amqp_live_exchange() {
    // ---
    let uri =
        std::env::var("AMQP_URL").unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".into());
    exchange_between_two_nodes(&uri, "mom-messenger-live").await;
}
