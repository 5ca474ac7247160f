use std::sync::Arc;

use shardgate::{
    filter::{self, FilterExt},
    Event, GatewayClient, GatewayConfig, ShardCoordinator,
};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let token = std::env::var("BOT_TOKEN")
        .map_err(|_| {
            println!("No BOT_TOKEN env var or invalid");
            std::process::exit(1);
        })
        .unwrap();

    let mut config = GatewayConfig::new(token);
    // guilds | guild messages | message content
    config.intents = (1 << 0) | (1 << 9) | (1 << 15);
    config.message_cache_size = 50;

    let coordinator = ShardCoordinator::new(config).await.unwrap();

    coordinator
        .subscribe(Arc::new(|event: Arc<Event>| async move {
            match &*event {
                Event::Ready { shard } => log::info!("Shard {} ready", shard),
                Event::Disconnected {
                    shard,
                    error,
                    will_retry,
                } => log::warn!(
                    "Shard {} disconnected: {}, retry: {}",
                    shard,
                    error,
                    will_retry
                ),
                Event::LatencyUpdated { shard, after, .. } => {
                    log::debug!("Shard {} latency {:?}", shard, after)
                }
                _ => {}
            }
        }))
        .await;

    coordinator
        .subscribe_filtered(
            Arc::new(|event: Arc<Event>| async move {
                if let Event::Dispatch { payload, .. } = &*event {
                    log::info!(
                        "Message: {}",
                        payload.get("content").and_then(|c| c.as_str()).unwrap_or("")
                    );
                }
            }),
            filter::dispatch("MESSAGE_CREATE").or(filter::dispatch("MESSAGE_UPDATE")),
        )
        .await;

    coordinator.start().await.unwrap();
    if let Err(e) = coordinator.wait_ready().await {
        log::error!("Shards stopped before ready: {}", e);
        return;
    }

    log::info!(
        "All shards ready, latency {:?}",
        GatewayClient::latency(&coordinator)
    );

    tokio::signal::ctrl_c().await.unwrap();
    coordinator.stop().await;
}
