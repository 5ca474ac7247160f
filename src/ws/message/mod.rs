//! Gateway wire frames.

mod inflate;
mod stream;
mod types;

pub use inflate::{InflateError, Inflater};
pub use stream::{FrameStreamSink, FrameStreamSinkError};
pub use types::{
    GuildMemberAdd, Hello, Identify, IdentifyProperties, MessageDelete, PresenceUpdate, Ready,
    RequestGuildMembers, Resume,
};

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::prelude::*;

/// Unknown op code number
#[derive(Debug, Snafu)]
#[snafu(display("unknown op code {op}"))]
pub struct UnknownOpCodeError {
    /// received op code
    pub op: u8,
}

/// Gateway frame op code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OpCode {
    /// event dispatched, server -> client
    Dispatch,
    /// keep alive, both directions
    Heartbeat,
    /// start a new session, client -> server
    Identify,
    /// update client presence, client -> server
    PresenceUpdate,
    /// join/leave/move voice channel, client -> server
    VoiceStateUpdate,
    /// resume an old session, client -> server
    Resume,
    /// server asks the client to reconnect and resume
    Reconnect,
    /// request guild member chunks, client -> server
    RequestGuildMembers,
    /// the session is invalid, server -> client
    InvalidSession,
    /// first frame after connect with heartbeat interval, server -> client
    Hello,
    /// heartbeat acknowledged, server -> client
    HeartbeatAck,
}

impl TryFrom<u8> for OpCode {
    type Error = UnknownOpCodeError;

    fn try_from(op: u8) -> Result<Self, Self::Error> {
        Ok(match op {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            _ => return UnknownOpCodeSnafu { op }.fail(),
        })
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        match op {
            OpCode::Dispatch => 0,
            OpCode::Heartbeat => 1,
            OpCode::Identify => 2,
            OpCode::PresenceUpdate => 3,
            OpCode::VoiceStateUpdate => 4,
            OpCode::Resume => 6,
            OpCode::Reconnect => 7,
            OpCode::RequestGuildMembers => 8,
            OpCode::InvalidSession => 9,
            OpCode::Hello => 10,
            OpCode::HeartbeatAck => 11,
        }
    }
}

/// Error when parse data as a frame
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ParseFrameError {
    /// data is not a valid frame envelope
    #[snafu(display("parse frame json failed: {source}"))]
    ParseJSONFailed {
        /// data for decode
        data: Bytes,
        /// source error
        source: serde_json::Error,
    },

    /// frame has an op code this client does not know
    #[snafu(display("frame has unknown op code: {source}"))]
    UnknownOp {
        /// source error
        source: UnknownOpCodeError,
    },

    /// frame data is not valid for its op/event type
    #[snafu(display("parse {what} payload failed: {source}"))]
    ParsePayloadFailed {
        /// op code or event name
        what: String,
        /// source error
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    op: u8,
    #[serde(default)]
    d: serde_json::Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// Gateway frame envelope `{op, d, s, t}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// op code
    pub op: OpCode,
    /// payload
    #[serde(default)]
    pub d: serde_json::Value,
    /// sequence number, dispatch only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// event name, dispatch only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Frame {
    /// Create a frame with arbitrary payload value
    pub fn new(op: OpCode, d: serde_json::Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// Create a frame with a typed payload
    pub fn with_payload<T: Serialize>(op: OpCode, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(op, serde_json::to_value(payload)?))
    }

    /// Heartbeat frame carrying the last received sequence
    pub fn heartbeat(seq: Option<u64>) -> Self {
        Self::new(
            OpCode::Heartbeat,
            seq.map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        )
    }

    /// Decode data to a frame
    pub fn decode(buff: &[u8]) -> Result<Self, ParseFrameError> {
        let raw: RawFrame = serde_json::from_slice(buff).with_context(|_| error::ParseJSONFailed {
            data: Bytes::copy_from_slice(buff),
        })?;

        Ok(Self {
            op: OpCode::try_from(raw.op).context(error::UnknownOp)?,
            d: raw.d,
            s: raw.s,
            t: raw.t,
        })
    }

    /// Encode frame to json text
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse payload as a typed value
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ParseFrameError> {
        T::deserialize(&self.d).with_context(|_| error::ParsePayloadFailed {
            what: self.t.clone().unwrap_or_else(|| format!("{:?}", self.op)),
        })
    }

    /// event name of a dispatch frame
    pub fn event_name(&self) -> Option<&str> {
        self.t.as_deref()
    }
}
