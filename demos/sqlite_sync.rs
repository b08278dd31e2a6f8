//! Send and receive through a shared SQLite file.
//!
//! Start it twice against the same database, in two terminals:
//!
//!     cargo run --example sqlite_sync -- /tmp/sync.db alice
//!     cargo run --example sqlite_sync -- /tmp/sync.db bob
//!
//! Each line typed on stdin is sent on channel `chat`.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use mom_messenger::{consumer, Messenger, Result, TransportBuilder};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let db = args.next().unwrap_or_else(|| "/tmp/sync.db".to_string());
    let name = args.next().unwrap_or_else(|| "node".to_string());

    let transport = TransportBuilder::new()
        .uri(format!("sqlite:{db}"))
        .node_id(name.clone())
        .poll_interval(Duration::from_millis(250))
        .build()
        .await?;

    let messenger = Messenger::new();
    messenger
        .subscribe("chat", consumer(|line| println!("> {line}")))
        .await?;
    messenger.start(transport).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !messenger.send("chat", &format!("{name}: {line}")).await {
            eprintln!("send failed");
        }
    }

    messenger.close().await
}
