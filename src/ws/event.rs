//! Events published to subscribers.

use std::{sync::Arc, time::Duration};

use crate::{cache::Guild, ws::client::GatewayError};

/// Event produced by a shard
#[derive(Debug, Clone)]
pub enum Event {
    /// connection handshake finished
    Connected {
        /// source shard
        shard: u32,
    },

    /// connection torn down
    Disconnected {
        /// source shard
        shard: u32,
        /// why the connection ended
        error: Arc<GatewayError>,
        /// the shard will reconnect by itself
        will_retry: bool,
    },

    /// guild warm up after READY finished
    Ready {
        /// source shard
        shard: u32,
    },

    /// a heartbeat ack updated the latency
    LatencyUpdated {
        /// source shard
        shard: u32,
        /// previous latency
        before: Option<Duration>,
        /// new latency
        after: Duration,
    },

    /// a known guild became available, after warm up, an outage or a resume
    GuildAvailable {
        /// source shard
        shard: u32,
        /// the guild
        guild: Arc<Guild>,
    },

    /// a guild went into an outage, or the connection holding it was lost
    GuildUnavailable {
        /// source shard
        shard: u32,
        /// the guild
        guild: Arc<Guild>,
    },

    /// the current user joined a guild
    JoinedGuild {
        /// source shard
        shard: u32,
        /// the guild
        guild: Arc<Guild>,
    },

    /// the current user left or was removed from a guild
    LeftGuild {
        /// source shard
        shard: u32,
        /// last known state of the guild
        guild: Arc<Guild>,
    },

    /// any dispatch frame, after the cache handled it
    Dispatch {
        /// source shard
        shard: u32,
        /// event name, like `MESSAGE_CREATE`
        name: String,
        /// dispatch sequence
        sequence: Option<u64>,
        /// raw event data
        payload: Arc<serde_json::Value>,
    },
}

impl Event {
    /// Shard that produced this event
    pub fn shard(&self) -> u32 {
        match self {
            Self::Connected { shard }
            | Self::Disconnected { shard, .. }
            | Self::Ready { shard }
            | Self::LatencyUpdated { shard, .. }
            | Self::GuildAvailable { shard, .. }
            | Self::GuildUnavailable { shard, .. }
            | Self::JoinedGuild { shard, .. }
            | Self::LeftGuild { shard, .. }
            | Self::Dispatch { shard, .. } => *shard,
        }
    }

    /// Short name of the event, the event name for dispatches
    pub fn name(&self) -> &str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Ready { .. } => "ready",
            Self::LatencyUpdated { .. } => "latency_updated",
            Self::GuildAvailable { .. } => "guild_available",
            Self::GuildUnavailable { .. } => "guild_unavailable",
            Self::JoinedGuild { .. } => "joined_guild",
            Self::LeftGuild { .. } => "left_guild",
            Self::Dispatch { name, .. } => name,
        }
    }

    /// Guild carried by the guild lifecycle events
    pub fn guild(&self) -> Option<&Arc<Guild>> {
        match self {
            Self::GuildAvailable { guild, .. }
            | Self::GuildUnavailable { guild, .. }
            | Self::JoinedGuild { guild, .. }
            | Self::LeftGuild { guild, .. } => Some(guild),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::snowflake::Snowflake;

    #[test]
    fn test_event_accessors() {
        let event = Event::Dispatch {
            shard: 3,
            name: "MESSAGE_CREATE".to_string(),
            sequence: Some(7),
            payload: Arc::new(serde_json::Value::Null),
        };
        assert_eq!(event.shard(), 3);
        assert_eq!(event.name(), "MESSAGE_CREATE");
        assert!(event.guild().is_none());

        let event = Event::LeftGuild {
            shard: 1,
            guild: Arc::new(Guild::unavailable(Snowflake(42))),
        };
        assert_eq!(event.name(), "left_guild");
        assert_eq!(event.guild().map(|g| g.id), Some(Snowflake(42)));
    }
}
