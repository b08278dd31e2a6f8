//! Two "instances" of a service keeping a cache in sync over the in-memory hub.
//!
//!     cargo run --example memory_sync

use std::sync::Arc;

use parking_lot::Mutex;

use mom_messenger::{
    //
    consumer,
    create_memory_transport_with_hub,
    MemoryHub,
    Messenger,
    Result,
    TransportConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt::init();

    let hub = MemoryHub::new();
    let web1 = Messenger::new();
    let web2 = Messenger::new();

    let evicted = Arc::new(Mutex::new(Vec::<String>::new()));
    {
        let evicted = Arc::clone(&evicted);
        web2.subscribe(
            "cache-invalidate",
            consumer(move |key| {
                println!("web-2: evict {key}");
                evicted.lock().push(key.to_string());
            }),
        )
        .await?;
    }

    let t1 = create_memory_transport_with_hub(TransportConfig::memory("web-1"), hub.clone()).await?;
    let t2 = create_memory_transport_with_hub(TransportConfig::memory("web-2"), hub.clone()).await?;
    web1.start(t1).await?;
    web2.start(t2).await?;

    for key in ["user:42", "user:7", "session:abc"] {
        web1.send("cache-invalidate", key).await;
    }

    println!("web-2 evicted {:?}", evicted.lock());

    web1.close().await?;
    web2.close().await?;
    Ok(())
}
