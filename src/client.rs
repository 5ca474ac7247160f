//! One interface over a single shard and a shard set.

use std::{sync::Arc, time::Duration};

use crate::{
    cache::{Channel, Guild, User},
    shard::ShardCoordinator,
    snowflake::Snowflake,
    ws::Shard,
    Result,
};

/// Operations shared by [`Shard`] and [`ShardCoordinator`], so callers can
/// run either behind one type.
#[async_trait::async_trait]
pub trait GatewayClient: Send + Sync {
    /// Start connecting in background
    async fn start(&self) -> Result<()>;
    /// Stop and wait for the teardown
    async fn stop(&self);
    /// Get a cached guild
    fn guild(&self, id: Snowflake) -> Option<Arc<Guild>>;
    /// Get a cached channel
    fn channel(&self, id: Snowflake) -> Option<Arc<Channel>>;
    /// Get a cached user
    fn user(&self, id: Snowflake) -> Option<Arc<User>>;
    /// Heartbeat latency, averaged over shards for a shard set
    fn latency(&self) -> Option<Duration>;
}

#[async_trait::async_trait]
impl GatewayClient for Shard {
    async fn start(&self) -> Result<()> {
        Shard::start(self).await
    }

    async fn stop(&self) {
        Shard::stop(self).await
    }

    fn guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        self.cache().guild(id)
    }

    fn channel(&self, id: Snowflake) -> Option<Arc<Channel>> {
        self.cache().channel(id)
    }

    fn user(&self, id: Snowflake) -> Option<Arc<User>> {
        self.cache().user(id)
    }

    fn latency(&self) -> Option<Duration> {
        Shard::latency(self)
    }
}

#[async_trait::async_trait]
impl GatewayClient for ShardCoordinator {
    async fn start(&self) -> Result<()> {
        ShardCoordinator::start(self).await
    }

    async fn stop(&self) {
        ShardCoordinator::stop(self).await
    }

    fn guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        ShardCoordinator::guild(self, id)
    }

    fn channel(&self, id: Snowflake) -> Option<Arc<Channel>> {
        ShardCoordinator::channel(self, id)
    }

    fn user(&self, id: Snowflake) -> Option<Arc<User>> {
        ShardCoordinator::user(self, id)
    }

    fn latency(&self) -> Option<Duration> {
        ShardCoordinator::latency(self)
    }
}
