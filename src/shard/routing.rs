use crate::snowflake::Snowflake;

/// Shard responsible for a guild, `(guild_id >> 22) % total_shards`
pub fn shard_id(guild_id: Snowflake, total_shards: u32) -> u32 {
    ((guild_id.get() >> 22) % u64::from(total_shards.max(1))) as u32
}
