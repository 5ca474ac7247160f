//! Gateway client configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::ws::message::{IdentifyProperties, PresenceUpdate};

/// Settings shared by every shard of a client.
///
/// Deserializable with all fields optional except the token, so it can be
/// embedded in whatever config file format the host program uses.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// bot token
    pub token: String,
    /// REST base url used for gateway discovery
    pub api_base_url: String,
    /// explicit gateway url, skips discovery when set
    pub gateway_url: Option<String>,
    /// gateway protocol version
    pub api_version: u8,
    /// request zlib-stream transport compression
    pub compress: bool,
    /// gateway intents bit set
    pub intents: u64,
    /// total shard count, discovered from /gateway/bot when unset
    pub total_shards: Option<u32>,
    /// shard ids this process runs, all of `0..total_shards` when unset
    pub shard_ids: Option<Vec<u32>>,
    /// shards allowed to identify at once, discovered from /gateway/bot when unset
    pub identify_max_concurrency: Option<u32>,
    /// connect + handshake deadline in milliseconds
    pub connection_timeout_ms: u64,
    /// time after which a slow subscriber is reported, none to never report
    pub handler_timeout_ms: Option<u64>,
    /// messages kept per channel, 0 disables the message cache
    pub message_cache_size: usize,
    /// member count over which a guild is considered large
    pub large_threshold: u32,
    /// how long an identify keeps its bucket after being sent, in milliseconds
    pub identify_cushion_ms: u64,
    /// milliseconds without a new guild after which warm up is considered done
    pub ready_quiet_period_ms: u64,
    /// extra milliseconds a missed heartbeat ack is tolerated while guilds warm up
    pub heartbeat_stall_grace_ms: u64,
    /// client properties sent in identify
    pub properties: IdentifyProperties,
    /// initial presence sent in identify
    pub presence: Option<PresenceUpdate>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base_url: crate::api::BASE_URL.to_string(),
            gateway_url: None,
            api_version: 10,
            compress: true,
            intents: 0,
            total_shards: None,
            shard_ids: None,
            identify_max_concurrency: None,
            connection_timeout_ms: 30_000,
            handler_timeout_ms: Some(3_000),
            message_cache_size: 0,
            large_threshold: 250,
            identify_cushion_ms: 5_000,
            ready_quiet_period_ms: 2_000,
            heartbeat_stall_grace_ms: 5_000,
            properties: IdentifyProperties::default(),
            presence: None,
        }
    }
}

impl GatewayConfig {
    /// Default config with a token
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    /// connect + handshake deadline
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// slow subscriber report threshold
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    /// identify bucket hold time
    pub fn identify_cushion(&self) -> Duration {
        Duration::from_millis(self.identify_cushion_ms)
    }

    /// guild warm up quiet period
    pub fn ready_quiet_period(&self) -> Duration {
        Duration::from_millis(self.ready_quiet_period_ms)
    }

    /// heartbeat stall grace during warm up
    pub fn heartbeat_stall_grace(&self) -> Duration {
        Duration::from_millis(self.heartbeat_stall_grace_ms)
    }
}
