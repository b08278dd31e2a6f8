// tests/transport_sql.rs

#![cfg(feature = "transport_sql")]

mod common;

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use common::{init_logging, Inbox};

use mom_messenger::{
    // ---
    Envelope,
    Messenger,
    TransportBuilder,
    TransportPtr,
};

const WAIT: Duration = Duration::from_secs(5);

async fn sql_transport(db: &Path, id: &str) -> TransportPtr {
    TransportBuilder::new()
        .uri(format!("sqlite:{}", db.display()))
        .node_id(id)
        .poll_interval(Duration::from_millis(50))
        .cleanup_interval(Duration::from_millis(50))
        .build()
        .await
        .expect("failed to create sql transport")
}

async fn messenger(db: &Path, id: &str, inbox: &Inbox) -> (Messenger, TransportPtr) {
    let messenger = Messenger::new();
    messenger.subscribe("sync", inbox.consumer()).await.unwrap();
    let transport = sql_transport(db, id).await;
    messenger.start(transport.clone()).await.expect("start failed");
    (messenger, transport)
}

fn row_count(db: &Path) -> i64 {
    let conn = rusqlite::Connection::open(db).unwrap();
    conn.query_row("SELECT COUNT(*) FROM messenger_messages", [], |row| row.get(0))
        .unwrap()
}

fn insert_row(db: &Path, age: Duration, channel: &str, env: &Envelope) {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    let time = (now - age).as_millis() as i64;
    let msg = BASE64.encode(env.encode().unwrap());

    let conn = rusqlite::Connection::open(db).unwrap();
    conn.execute(
        "INSERT INTO messenger_messages (time, channel, msg) VALUES (?1, ?2, ?3)",
        rusqlite::params![time, channel, msg],
    )
    .unwrap();
}

#[tokio::test]
async fn sql_delivers_between_processes() {
    // ---
    // Arrange
    // ---
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("messages.db");

    let inbox_a = Inbox::new();
    let inbox_b = Inbox::new();
    let (a, _) = messenger(&db, "a", &inbox_a).await;
    let (b, _) = messenger(&db, "b", &inbox_b).await;

    // ---
    // Act
    // ---
    assert!(a.send("sync", "from a").await);
    assert!(b.send("sync", "from b").await);

    // ---
    // Assert
    // ---
    assert!(inbox_b.wait_for(1, WAIT).await, "b never saw a's message");
    assert!(inbox_a.wait_for(1, WAIT).await, "a never saw b's message");

    // give both pollers a few more ticks to (not) replay their own rows
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(inbox_a.messages(), vec!["from b".to_string()]);
    assert_eq!(inbox_b.messages(), vec!["from a".to_string()]);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn sql_start_skips_history_and_restart_resumes() {
    // ---
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("messages.db");

    let writer_inbox = Inbox::new();
    let (writer, _) = messenger(&db, "writer", &writer_inbox).await;
    assert!(writer.send("sync", "before reader existed").await);

    let inbox = Inbox::new();
    let (reader, transport) = messenger(&db, "reader", &inbox).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(inbox.messages().is_empty(), "history must not be replayed");

    // rows written while stopped are skipped as well
    transport.close().await.unwrap();
    transport.close().await.unwrap();
    assert!(writer.send("sync", "while reader was down").await);

    reader.start(transport.clone()).await.unwrap();
    assert!(writer.send("sync", "after restart").await);

    assert!(inbox.wait_for(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(inbox.messages(), vec!["after restart".to_string()]);

    reader.close().await.unwrap();
    writer.close().await.unwrap();
}

#[tokio::test]
async fn sql_poll_window_and_channel_filter() {
    // ---
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("messages.db");

    let inbox = Inbox::new();
    let (reader, _) = messenger(&db, "reader", &inbox).await;

    insert_row(&db, Duration::from_secs(45), "sync", &Envelope::with_id(1, "stale"));
    insert_row(&db, Duration::ZERO, "other", &Envelope::with_id(2, "wrong channel"));
    insert_row(&db, Duration::ZERO, "sync", &Envelope::with_id(3, "fresh"));

    assert!(inbox.wait_for(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(inbox.messages(), vec!["fresh".to_string()]);

    reader.close().await.unwrap();
}

#[tokio::test]
async fn sql_redelivered_row_is_suppressed() {
    // ---
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("messages.db");

    let inbox = Inbox::new();
    let (reader, _) = messenger(&db, "reader", &inbox).await;

    let env = Envelope::with_id(77, "once");
    insert_row(&db, Duration::ZERO, "sync", &env);
    insert_row(&db, Duration::ZERO, "sync", &env);

    assert!(inbox.wait_for(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(inbox.messages(), vec!["once".to_string()]);

    reader.close().await.unwrap();
}

#[tokio::test]
async fn sql_cleanup_purges_expired_rows() {
    // ---
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("messages.db");

    let transport = TransportBuilder::new()
        .uri(format!("sqlite:{}", db.display()))
        .node_id("janitor")
        .poll_interval(Duration::from_millis(50))
        .cleanup_interval(Duration::from_millis(50))
        .retention(Duration::from_millis(100))
        .build()
        .await
        .unwrap();

    let messenger = Messenger::new();
    messenger.start(transport).await.unwrap();
    assert!(messenger.send("sync", "short lived").await);
    assert_eq!(row_count(&db), 1);

    let deadline = tokio::time::Instant::now() + WAIT;
    while row_count(&db) > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(row_count(&db), 0);

    messenger.close().await.unwrap();
}

#[tokio::test]
async fn sql_unwritable_path_fails_start() {
    // ---
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("missing-dir").join("messages.db");

    let transport = sql_transport(&db, "broken").await;
    let messenger = Messenger::new();

    assert!(messenger.start(transport.clone()).await.is_err());
    assert!(!transport.is_enabled());
    assert!(!messenger.send("sync", "nope").await);

    messenger.close().await.unwrap();
}
