//! Gateway websocket protocol client implement

pub(crate) mod client;
mod event;
pub mod message;

pub use client::{
    Backoff, ConnectionState, GatewayError, SendError, Session, Shard, FATAL_CLOSE_CODES,
    INITIAL_RECONNECT_DELAY_MS, MAX_RECONNECT_DELAY_MS, RECONNECT_JITTER_MS,
};
pub use event::Event;
