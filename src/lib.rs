//! # Shardgate
//!
//! Session and connection engine for a sharded real time chat gateway.
//!
//! A [`Shard`] keeps one compressed websocket connection alive: it identifies
//! or resumes, heartbeats, reconnects with backoff and maintains an
//! [`EntityCache`] from dispatches. A [`ShardCoordinator`] runs many shards
//! behind one identify lock and one event hub. Both implement
//! [`GatewayClient`].

#![warn(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod filter;
pub mod shard;
pub mod snowflake;
pub mod subscriber;
pub mod ws;

mod error;
pub use error::{Error, Result};

pub use cache::EntityCache;
pub use client::GatewayClient;
pub use config::GatewayConfig;
pub use shard::{ShardCoordinator, ShardDescriptor};
pub use snowflake::Snowflake;
pub use subscriber::{EventHub, Subscriber};
pub use ws::{ConnectionState, Event, GatewayError, Shard};
