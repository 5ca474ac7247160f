//! Gateway discovery response types

use std::{fmt::Display, str::FromStr};

use serde::Deserialize;
use snafu::prelude::*;

/// data type for api /gateway
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayInfo {
    /// gateway url
    pub url: String,
}

/// session start limit of the current token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SessionStartLimit {
    /// total identifies allowed per reset period
    pub total: u32,
    /// identifies left in the current period
    pub remaining: u32,
    /// milliseconds until the period resets
    pub reset_after: u64,
    /// how many shards may identify at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}

/// data type for api /gateway/bot
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBotInfo {
    /// gateway url
    pub url: String,
    /// recommended shard count
    pub shards: u32,
    /// identify limits
    pub session_start_limit: SessionStartLimit,
}

/// Parse string as gateway url error
#[derive(Debug, Snafu)]
#[snafu(
    visibility(pub(crate)),
    module(parse_gateway_url_error_variant),
    context(suffix(false))
)]
pub enum ParseGatewayURLError {
    #[snafu(display("{s} is an invalid url: {source}"))]
    /// the str is not a valid url
    InvalidURL {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the parsed url schema is not websocket
    #[snafu(display("the url {s} has invalid schema {schema}, only ws or wss is ok"))]
    InvalidSchema {
        /// the url
        s: String,
        /// invalid schema
        schema: String,
    },

    /// the parsed url has no host
    #[snafu(display("the gateway url {s} has no host"))]
    NoHost {
        /// the url
        s: String,
    },
}

/// A validated gateway base url, the connection query is added by [`GatewayURL::url`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayURL {
    base: url::Url,
}

impl GatewayURL {
    /// construct final url with protocol version, encoding and transport compression
    pub fn url(&self, version: u8, compress: bool) -> url::Url {
        let mut u = self.base.clone();
        u.set_query(None);

        {
            let mut query = u.query_pairs_mut();
            query.append_pair("v", &version.to_string());
            query.append_pair("encoding", "json");
            if compress {
                query.append_pair("compress", "zlib-stream");
            }
        }

        u
    }

    /// the url as it was given
    pub fn as_str(&self) -> &str {
        self.base.as_str()
    }
}

impl FromStr for GatewayURL {
    type Err = ParseGatewayURLError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = url::Url::parse(s)
            .with_context(|_| parse_gateway_url_error_variant::InvalidURL { s: s.to_string() })?;

        ensure!(
            url.scheme() == "wss" || url.scheme() == "ws",
            parse_gateway_url_error_variant::InvalidSchema {
                s,
                schema: url.scheme(),
            }
        );

        ensure!(
            url.host().is_some(),
            parse_gateway_url_error_variant::NoHost { s }
        );

        Ok(GatewayURL { base: url })
    }
}

impl Display for GatewayURL {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.base.fmt(f)
    }
}
