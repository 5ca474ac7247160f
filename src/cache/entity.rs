//! Cached entity records.
//!
//! Only the fields the gateway engine itself needs are typed, everything else
//! the server sends is kept in `extra` untouched.

use serde::{Deserialize, Serialize};

use crate::snowflake::Snowflake;

type Extra = serde_json::Map<String, serde_json::Value>;

/// Channel type number of a direct message channel
pub const CHANNEL_TYPE_DM: u8 = 1;

/// A user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// user id
    pub id: Snowflake,
    /// user name
    #[serde(default)]
    pub username: String,
    /// whether the user is a bot account
    #[serde(default)]
    pub bot: bool,
    /// other fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// A guild member, only carried inside guild payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildMember {
    /// member user, absent in some partial payloads
    #[serde(default)]
    pub user: Option<User>,
    /// other fields
    #[serde(flatten)]
    pub extra: Extra,
}

/// A guild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    /// guild id
    pub id: Snowflake,
    /// guild name, absent while unavailable
    #[serde(default)]
    pub name: Option<String>,
    /// guild is in an outage or not yet sent
    #[serde(default)]
    pub unavailable: bool,
    /// total member count
    #[serde(default)]
    pub member_count: Option<u64>,
    /// channels, only present in GUILD_CREATE; moved into the channel store when cached
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
    /// members, only present in GUILD_CREATE; their users are moved into the user store
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<GuildMember>,
    /// other fields
    #[serde(flatten)]
    pub extra: Extra,
}

impl Guild {
    /// A placeholder for a guild the server has not sent yet
    pub fn unavailable(id: Snowflake) -> Self {
        Self {
            id,
            name: None,
            unavailable: true,
            member_count: None,
            channels: Vec::new(),
            members: Vec::new(),
            extra: Extra::new(),
        }
    }

    /// Whether the full guild data is present
    pub fn is_available(&self) -> bool {
        !self.unavailable
    }
}

/// A guild channel or a private channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// channel id
    pub id: Snowflake,
    /// channel type
    #[serde(rename = "type", default)]
    pub kind: u8,
    /// owner guild, none for private channels
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// channel name
    #[serde(default)]
    pub name: Option<String>,
    /// recipients of a private channel
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<User>,
    /// other fields
    #[serde(flatten)]
    pub extra: Extra,
}

impl Channel {
    /// The other user of a direct message channel
    pub fn dm_recipient(&self) -> Option<Snowflake> {
        if self.kind == CHANNEL_TYPE_DM {
            self.recipients.first().map(|u| u.id)
        } else {
            None
        }
    }
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// message id
    pub id: Snowflake,
    /// channel the message was sent in
    pub channel_id: Snowflake,
    /// guild the message was sent in
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// author
    #[serde(default)]
    pub author: Option<User>,
    /// text content
    #[serde(default)]
    pub content: String,
    /// other fields
    #[serde(flatten)]
    pub extra: Extra,
}
