//! Multi shard coordination.

mod identify;
mod routing;

pub use identify::{IdentifyLock, IdentifyPermit};
pub use routing::shard_id;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures_util::future::{join_all, try_join_all};
use snafu::prelude::*;

use crate::{
    api::{self, types::GatewayURL},
    cache::{Channel, Guild, User},
    config::GatewayConfig,
    error,
    filter::Filter,
    snowflake::Snowflake,
    subscriber::{EventHub, Subscriber},
    ws::{GatewayError, Shard},
    Result,
};

/// Position of a shard in the shard set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardDescriptor {
    /// shard id
    pub id: u32,
    /// number of shards the bot runs across all processes
    pub total_shards: u32,
}

/// Runs a set of shards sharing one identify lock and one event hub.
#[derive(Debug)]
pub struct ShardCoordinator {
    total_shards: u32,
    shards: BTreeMap<u32, Shard>,
    identify: Arc<IdentifyLock>,
    hub: Arc<EventHub>,
}

impl ShardCoordinator {
    /// Create the shards described by `config`.
    ///
    /// Shard count, identify concurrency and gateway url not set in the
    /// config are discovered from the bot gateway endpoint.
    pub async fn new(mut config: GatewayConfig) -> Result<Self> {
        let api = api::Client::new_from_bot_token(&config.token)
            .and_then(|c| c.with_base_url(&config.api_base_url))
            .context(error::CallAPIFailed)?;

        if config.total_shards.is_none()
            || config.identify_max_concurrency.is_none()
            || config.gateway_url.is_none()
        {
            log::info!("Getting bot gateway info...");

            let info = api.gateway_bot().await.context(error::CallAPIFailed)?;

            log::debug!(
                "Got bot gateway info: url {}, {} shards, max concurrency {}, {} sessions remaining",
                info.url,
                info.shards,
                info.session_start_limit.max_concurrency,
                info.session_start_limit.remaining
            );

            config.total_shards.get_or_insert(info.shards);
            config
                .identify_max_concurrency
                .get_or_insert(info.session_start_limit.max_concurrency);
            config.gateway_url.get_or_insert(info.url);
        }

        if let Some(url) = &config.gateway_url {
            url.parse::<GatewayURL>()
                .with_context(|_| error::InvalidGatewayURL { url })?;
        }

        let total_shards = config.total_shards.unwrap_or(1);
        ensure!(
            total_shards > 0,
            error::InvalidShardConfig {
                reason: "total shards is 0",
            }
        );

        let ids = match &config.shard_ids {
            Some(ids) => ids.clone(),
            None => (0..total_shards).collect(),
        };
        ensure!(
            !ids.is_empty(),
            error::InvalidShardConfig {
                reason: "no shard to run",
            }
        );
        if let Some(bad) = ids.iter().find(|id| **id >= total_shards) {
            return error::InvalidShardConfig {
                reason: format!("shard {} out of {} shards", bad, total_shards),
            }
            .fail();
        }

        let identify = Arc::new(IdentifyLock::new(
            config.identify_max_concurrency.unwrap_or(1),
            config.identify_cushion(),
        ));
        let hub = Arc::new(EventHub::new(config.handler_timeout()));
        let config = Arc::new(config);

        let mut shards = BTreeMap::new();
        for id in ids {
            let descriptor = ShardDescriptor { id, total_shards };
            let shard = Shard::from_parts(
                descriptor,
                Arc::clone(&config),
                api.clone(),
                Arc::clone(&identify),
                Arc::clone(&hub),
            );
            if shards.insert(id, shard).is_some() {
                return error::InvalidShardConfig {
                    reason: format!("shard {} listed twice", id),
                }
                .fail();
            }
        }

        log::info!(
            "Created {} of {} shards, identify concurrency {}",
            shards.len(),
            total_shards,
            identify.max_concurrency()
        );

        Ok(Self {
            total_shards,
            shards,
            identify,
            hub,
        })
    }

    /// Total shard count across all processes
    pub fn total_shards(&self) -> u32 {
        self.total_shards
    }

    /// Shards run by this coordinator, by id
    pub fn shards(&self) -> impl Iterator<Item = &Shard> {
        self.shards.values()
    }

    /// Get a shard by id
    pub fn shard(&self, id: u32) -> Option<&Shard> {
        self.shards.get(&id)
    }

    /// Shard responsible for a guild, if this coordinator runs it
    pub fn shard_for(&self, guild_id: Snowflake) -> Option<&Shard> {
        self.shard(shard_id(guild_id, self.total_shards))
    }

    /// Identify lock shared by all shards
    pub fn identify_lock(&self) -> &Arc<IdentifyLock> {
        &self.identify
    }

    /// Start every shard in background, they identify through the shared lock
    pub async fn start(&self) -> Result<()> {
        for shard in self.shards.values() {
            shard.start().await?;
        }
        Ok(())
    }

    /// Stop every shard
    pub async fn stop(&self) {
        join_all(self.shards.values().map(|s| s.stop())).await;
    }

    /// Wait until every shard is ready, or fail as soon as one of them stops
    /// for good
    pub async fn wait_ready(&self) -> std::result::Result<(), Arc<GatewayError>> {
        try_join_all(self.shards.values().map(|s| s.wait_ready())).await?;
        Ok(())
    }

    /// Mean heartbeat latency over the shards that measured one
    pub fn latency(&self) -> Option<Duration> {
        let measured: Vec<_> = self.shards.values().filter_map(Shard::latency).collect();
        if measured.is_empty() {
            None
        } else {
            Some(measured.iter().sum::<Duration>() / measured.len() as u32)
        }
    }

    /// Get a guild from the cache of its shard
    pub fn guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        self.shard_for(id)?.cache().guild(id)
    }

    /// Get a channel from whichever shard caches it
    pub fn channel(&self, id: Snowflake) -> Option<Arc<Channel>> {
        self.shards.values().find_map(|s| s.cache().channel(id))
    }

    /// Get a user from whichever shard caches it
    pub fn user(&self, id: Snowflake) -> Option<Arc<User>> {
        self.shards.values().find_map(|s| s.cache().user(id))
    }

    /// Subscribe to the events of all shards
    pub async fn subscribe<S: Subscriber + 'static>(&self, subscriber: Arc<S>) {
        self.hub.subscribe(subscriber).await
    }

    /// Subscribe to the events of all shards passing `filter`
    pub async fn subscribe_filtered<S, F>(&self, subscriber: Arc<S>, filter: F)
    where
        S: Subscriber + 'static,
        F: Filter + Send + Sync + 'static,
    {
        self.hub.subscribe_filtered(subscriber, filter).await
    }
}
