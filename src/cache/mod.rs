//! Per connection entity cache.

mod entity;
mod shared;

pub use entity::{Channel, Guild, GuildMember, Message, User, CHANNEL_TYPE_DM};
pub use shared::SharedStore;

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use dashmap::DashMap;

use crate::snowflake::Snowflake;

const CHANNELS_PER_GUILD: f64 = 10.22;
const USERS_PER_GUILD: f64 = 47.78;
const CAPACITY_SLACK: f64 = 1.05;

/// Initial sizes of the cache maps, derived from the READY payload counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCapacity {
    /// guild map
    pub guilds: usize,
    /// channel map
    pub channels: usize,
    /// direct message index
    pub dm_channels: usize,
    /// user map
    pub users: usize,
}

impl CacheCapacity {
    /// Compute capacities for a session with `guilds` guilds and `dms` private channels
    pub fn estimate(guilds: usize, dms: usize) -> Self {
        let g = guilds as f64;
        let d = dms as f64;
        Self {
            guilds: (g * CAPACITY_SLACK) as usize,
            channels: ((g * CHANNELS_PER_GUILD + d) * CAPACITY_SLACK) as usize,
            dm_channels: (d * CAPACITY_SLACK) as usize,
            users: (g * USERS_PER_GUILD * CAPACITY_SLACK) as usize,
        }
    }
}

/// Concurrent store of the guilds, channels, users and recent messages seen on
/// one connection.
///
/// Single entity reads and writes are lock free with respect to each other.
/// Operations that span several maps (a guild and its channels, a channel and
/// the direct message index) hold the write side of a gate that every reader
/// holds the read side of, so a reader never observes them half done.
#[derive(Debug)]
pub struct EntityCache {
    gate: RwLock<()>,
    guilds: SharedStore<Guild>,
    channels: SharedStore<Channel>,
    users: SharedStore<User>,
    guild_channels: DashMap<Snowflake, Vec<Snowflake>>,
    dm_channels: DashMap<Snowflake, Snowflake>,
    messages: DashMap<Snowflake, VecDeque<Message>>,
    message_cache_size: usize,
    capacity: CacheCapacity,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

impl EntityCache {
    /// Create an empty cache sized for `guilds` guilds and `dms` private channels,
    /// keeping at most `message_cache_size` messages per channel.
    pub fn new(guilds: usize, dms: usize, message_cache_size: usize) -> Self {
        let capacity = CacheCapacity::estimate(guilds, dms);

        log::debug!("Create entity cache with capacity {:?}", capacity);

        Self {
            gate: RwLock::new(()),
            guilds: SharedStore::with_capacity(capacity.guilds),
            channels: SharedStore::with_capacity(capacity.channels),
            users: SharedStore::with_capacity(capacity.users),
            guild_channels: DashMap::with_capacity(capacity.guilds),
            dm_channels: DashMap::with_capacity(capacity.dm_channels),
            messages: DashMap::new(),
            message_cache_size,
            capacity,
        }
    }

    /// Capacities this cache was created with
    pub fn capacity(&self) -> CacheCapacity {
        self.capacity
    }

    fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== guilds =====

    /// Get a guild
    pub fn guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        let _gate = self.read();
        self.guilds.get(id)
    }

    /// Get a guild together with all of its channels, as one consistent view
    pub fn guild_with_channels(&self, id: Snowflake) -> Option<(Arc<Guild>, Vec<Arc<Channel>>)> {
        let _gate = self.read();
        let guild = self.guilds.get(id)?;
        let channels = self
            .guild_channels
            .get(&id)
            .map(|ids| ids.iter().filter_map(|c| self.channels.get(*c)).collect())
            .unwrap_or_default();
        Some((guild, channels))
    }

    /// Ids of every cached guild
    pub fn guild_ids(&self) -> Vec<Snowflake> {
        let _gate = self.read();
        self.guilds.ids()
    }

    /// Number of cached guilds
    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    /// Add or replace a guild.
    ///
    /// Channels and member users carried by the payload are moved into their
    /// own stores; the stored guild record keeps neither. A payload without
    /// channels leaves the already cached channels of the guild alone.
    pub fn add_guild(&self, mut guild: Guild) -> Arc<Guild> {
        let channels = std::mem::take(&mut guild.channels);
        let members = std::mem::take(&mut guild.members);
        let id = guild.id;

        let _gate = self.write();

        for member in members {
            if let Some(user) = member.user {
                self.users.insert(user.id, user);
            }
        }

        if !channels.is_empty() {
            let ids: Vec<_> = channels.iter().map(|c| c.id).collect();
            if let Some(old) = self.guild_channels.insert(id, ids.clone()) {
                for stale in old.into_iter().filter(|c| !ids.contains(c)) {
                    self.channels.remove(stale);
                    self.messages.remove(&stale);
                }
            }
            for mut channel in channels {
                channel.guild_id = Some(id);
                self.channels.insert(channel.id, channel);
            }
        }

        self.guilds.put(id, guild)
    }

    /// Get a guild, inserting an unavailable placeholder when absent
    pub fn get_or_add_guild(&self, id: Snowflake) -> Arc<Guild> {
        let _gate = self.read();
        self.guilds
            .get_or_insert_with(id, || Guild::unavailable(id))
    }

    /// Modify a cached guild, returns false if it is not cached
    pub fn update_guild<F: FnOnce(&mut Guild)>(&self, id: Snowflake, f: F) -> bool {
        let _gate = self.read();
        self.guilds.update(id, f)
    }

    /// Remove a guild and everything that belongs to it
    pub fn remove_guild(&self, id: Snowflake) -> Option<Guild> {
        let _gate = self.write();
        let removed = self.guilds.remove(id);
        let channels = self.remove_guild_channels(id);

        log::trace!(
            "Removed guild {} with {} channels from cache",
            id,
            channels
        );

        removed
    }

    fn remove_guild_channels(&self, guild_id: Snowflake) -> usize {
        let ids = self
            .guild_channels
            .remove(&guild_id)
            .map(|(_, ids)| ids)
            .unwrap_or_default();
        for channel_id in &ids {
            self.channels.remove(*channel_id);
            self.messages.remove(channel_id);
        }
        ids.len()
    }

    // ===== channels =====

    /// Get a channel
    pub fn channel(&self, id: Snowflake) -> Option<Arc<Channel>> {
        let _gate = self.read();
        self.channels.get(id)
    }

    /// Get the direct message channel with a user
    pub fn dm_channel(&self, user_id: Snowflake) -> Option<Arc<Channel>> {
        let _gate = self.read();
        let channel_id = *self.dm_channels.get(&user_id)?;
        self.channels.get(channel_id)
    }

    /// Number of cached channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of cached direct message channels
    pub fn dm_channel_count(&self) -> usize {
        self.dm_channels.len()
    }

    /// Add or replace a channel, keeping the guild and direct message indexes in step
    pub fn add_channel(&self, channel: Channel) -> Arc<Channel> {
        let id = channel.id;
        let _gate = self.write();

        if let Some(old) = self.channels.get_model(id) {
            self.unindex_channel(&old);
        }

        if let Some(recipient) = channel.dm_recipient() {
            self.dm_channels.insert(recipient, id);
            for user in &channel.recipients {
                self.users.get_or_insert_with(user.id, || user.clone());
            }
        }
        if let Some(guild_id) = channel.guild_id {
            self.guild_channels.entry(guild_id).or_default().push(id);
        }

        self.channels.put(id, channel)
    }

    /// Get a channel, inserting the one built by `f` when absent
    pub fn get_or_add_channel<F: FnOnce() -> Channel>(&self, id: Snowflake, f: F) -> Arc<Channel> {
        if let Some(channel) = self.channel(id) {
            return channel;
        }
        let mut channel = f();
        channel.id = id;
        self.add_channel(channel)
    }

    /// Remove a channel and its cached messages
    pub fn remove_channel(&self, id: Snowflake) -> Option<Channel> {
        let _gate = self.write();
        let removed = self.channels.remove(id)?;
        self.unindex_channel(&removed);
        self.messages.remove(&id);
        Some(removed)
    }

    fn unindex_channel(&self, channel: &Channel) {
        if let Some(recipient) = channel.dm_recipient() {
            self.dm_channels.remove_if(&recipient, |_, c| *c == channel.id);
        }
        if let Some(guild_id) = channel.guild_id {
            if let Some(mut ids) = self.guild_channels.get_mut(&guild_id) {
                ids.retain(|c| *c != channel.id);
            }
        }
    }

    // ===== users =====

    /// Get a user
    pub fn user(&self, id: Snowflake) -> Option<Arc<User>> {
        let _gate = self.read();
        self.users.get(id)
    }

    /// Number of cached users
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Add or replace a user
    pub fn add_user(&self, user: User) -> Arc<User> {
        let _gate = self.read();
        self.users.put(user.id, user)
    }

    /// Get a user, inserting the one built by `f` when absent
    pub fn get_or_add_user<F: FnOnce() -> User>(&self, id: Snowflake, f: F) -> Arc<User> {
        let _gate = self.read();
        self.users.get_or_insert_with(id, f)
    }

    /// Remove a user
    pub fn remove_user(&self, id: Snowflake) -> Option<User> {
        let _gate = self.read();
        self.users.remove(id)
    }

    // ===== messages =====

    /// Remember a message, evicting the oldest of its channel over the limit.
    /// Does nothing when the message cache is disabled.
    pub fn add_message(&self, message: Message) {
        if self.message_cache_size == 0 {
            return;
        }

        let _gate = self.read();
        let mut queue = self.messages.entry(message.channel_id).or_default();
        queue.push_back(message);
        while queue.len() > self.message_cache_size {
            queue.pop_front();
        }
    }

    /// Forget a message
    pub fn remove_message(&self, channel_id: Snowflake, id: Snowflake) -> Option<Message> {
        let _gate = self.read();
        let mut queue = self.messages.get_mut(&channel_id)?;
        let pos = queue.iter().position(|m| m.id == id)?;
        queue.remove(pos)
    }

    /// Cached messages of a channel, oldest first
    pub fn messages(&self, channel_id: Snowflake) -> Vec<Message> {
        let _gate = self.read();
        self.messages
            .get(&channel_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ===== maintenance =====

    /// Drop dead shared handles from every store
    pub fn purge_dead_handles(&self) -> usize {
        self.guilds.purge_dead() + self.channels.purge_dead() + self.users.purge_dead()
    }
}
