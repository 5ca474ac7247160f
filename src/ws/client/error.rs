use snafu::prelude::*;
use tokio_tungstenite::tungstenite;

use crate::{
    api::{self, types::ParseGatewayURLError},
    ws::message::FrameStreamSinkError,
};

/// Close codes after which reconnecting can never succeed
pub const FATAL_CLOSE_CODES: &[u16] = &[
    4004, // authentication failed
    4006, // session no longer valid
    4010, // invalid shard
    4011, // sharding required
    4012, // invalid api version
    4013, // invalid intents
    4014, // disallowed intents
];

/// Why a gateway connection ended or could not be established
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(gateway_error), context(suffix(false)))]
pub enum GatewayError {
    /// the connection was stopped locally
    #[snafu(display("connection cancelled"))]
    Cancelled,

    /// handshake did not finish within the connection timeout
    #[snafu(display("connection timeout"))]
    Timeout,

    /// fetch gateway url from api failed
    #[snafu(display("resolve gateway url failed: {source}"))]
    ResolveURLFailed {
        /// source error
        source: api::Error,
    },

    /// gateway url is invalid
    #[snafu(display("invalid gateway url {url}: {source}"))]
    InvalidURL {
        /// the url
        url: String,
        /// source error
        source: ParseGatewayURLError,
    },

    /// websocket handshake failed
    #[snafu(display("connect ws gateway {url} failed: {source}"))]
    ConnectFailed {
        /// connected url
        url: String,
        /// source error
        source: tungstenite::Error,
    },

    /// the frame stream broke or the server closed it
    #[snafu(display("frame stream broken: {source}"))]
    Stream {
        /// source error
        source: FrameStreamSinkError,
    },

    /// the frame stream ended without a close frame
    #[snafu(display("frame stream ended"))]
    StreamEnded,

    /// the connection ended before the server said hello
    #[snafu(display("connection ended before hello"))]
    HandshakeAborted,

    /// sending the handshake frame failed
    #[snafu(display("send {what} failed: {source}"))]
    HandshakeSendFailed {
        /// frame kind
        what: &'static str,
        /// source error
        source: SendError,
    },

    /// no frame received for a whole heartbeat interval with acks pending
    #[snafu(display("server missed last heartbeat"))]
    HeartbeatMissed,

    /// server asked for a reconnect
    #[snafu(display("server requested reconnect"))]
    ReconnectRequested,

    /// identify lock was closed
    #[snafu(display("identify lock closed"))]
    IdentifyLockClosed,
}

impl GatewayError {
    /// Close code sent by the server, if the connection ended with one
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Stream {
                source: FrameStreamSinkError::Closed { code, .. },
            } => *code,
            _ => None,
        }
    }

    /// Check if retrying after this error is pointless
    pub fn is_fatal(&self) -> bool {
        self.close_code()
            .map(|code| FATAL_CLOSE_CODES.contains(&code))
            .unwrap_or(false)
    }

    /// Check if this error is a local stop
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Error when send a frame on the current connection
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(send_error), context(suffix(false)))]
pub enum SendError {
    /// there is no live connection
    #[snafu(display("not connected"))]
    NotConnected,

    /// connection was closed while the frame was queued
    #[snafu(display("connection closed before the frame was sent"))]
    Closed,

    /// building the frame payload failed
    #[snafu(display("encode frame payload failed: {source}"))]
    Encode {
        /// source error
        source: serde_json::Error,
    },

    /// the underlying sink failed
    #[snafu(display("write frame failed: {source}"))]
    Write {
        /// source error
        source: FrameStreamSinkError,
    },
}
