use serde::{Deserialize, Serialize};

use crate::{
    cache::{Channel, Guild, User},
    snowflake::Snowflake,
};

/// Hello frame data, first frame sent by the gateway on every connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    /// heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Client properties reported in identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifyProperties {
    /// operating system
    pub os: String,
    /// library name
    pub browser: String,
    /// library name
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Presence update data, sent standalone (op 3) or inside identify
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// unix time in milliseconds of when the client went idle
    pub since: Option<u64>,
    /// activities, opaque to this crate
    #[serde(default)]
    pub activities: Vec<serde_json::Value>,
    /// online, dnd, idle, invisible or offline
    pub status: String,
    /// whether the client is afk
    #[serde(default)]
    pub afk: bool,
}

impl Default for PresenceUpdate {
    fn default() -> Self {
        Self {
            since: None,
            activities: Vec::new(),
            status: "online".to_string(),
            afk: false,
        }
    }
}

/// Identify frame data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identify {
    /// auth token
    pub token: String,
    /// client properties
    pub properties: IdentifyProperties,
    /// gateway intents bit set
    pub intents: u64,
    /// `[shard_id, total_shards]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
    /// member count over which a guild is considered large
    pub large_threshold: u32,
    /// initial presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdate>,
}

/// Resume frame data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resume {
    /// auth token
    pub token: String,
    /// session to resume
    pub session_id: String,
    /// last sequence received
    pub seq: u64,
}

/// Request guild members frame data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGuildMembers {
    /// guild to request members for
    pub guild_id: Snowflake,
    /// username prefix, empty string for all members
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// max number of members, 0 for no limit
    pub limit: u32,
    /// include presences of matched members
    #[serde(default)]
    pub presences: bool,
    /// explicit users to fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<Snowflake>>,
    /// echoed back in the member chunk events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// READY dispatch data
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    /// gateway version
    #[serde(default)]
    pub v: u8,
    /// current user
    pub user: User,
    /// guilds of the user, mostly unavailable at this point
    #[serde(default)]
    pub guilds: Vec<Guild>,
    /// new session id
    pub session_id: String,
    /// url to use for resuming
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// direct message channels
    #[serde(default)]
    pub private_channels: Vec<Channel>,
    /// `[shard_id, total_shards]`
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

/// Payload of delete events that carry only ids
#[derive(Debug, Clone, Deserialize)]
pub struct MessageDelete {
    /// deleted message
    pub id: Snowflake,
    /// channel of the message
    pub channel_id: Snowflake,
}

/// Payload of GUILD_MEMBER_ADD, only the user part is of interest
#[derive(Debug, Clone, Deserialize)]
pub struct GuildMemberAdd {
    /// guild joined
    pub guild_id: Snowflake,
    /// member user
    pub user: User,
}
