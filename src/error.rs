//! crate error types

use snafu::prelude::*;

use super::api::Error as APIError;

/// crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// crate error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Call gateway discovery api failed
    #[snafu(display("call api failed: {source}"))]
    CallAPIFailed {
        /// source error
        source: APIError,
    },

    /// Configured or discovered gateway url is invalid
    #[snafu(display("invalid gateway url {url}: {source}"))]
    InvalidGatewayURL {
        /// received url
        url: String,
        /// source error
        source: crate::api::types::ParseGatewayURLError,
    },

    /// Shard count or shard ids make no sense
    #[snafu(display("invalid shard config: {reason}"))]
    InvalidShardConfig {
        /// what is wrong
        reason: String,
    },

    /// Start was called on a shard that is not stopped
    #[snafu(display("shard {shard} is already running"))]
    AlreadyRunning {
        /// shard id
        shard: u32,
    },
}
