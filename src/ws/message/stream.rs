use std::task::Poll;

use futures_util::{ready, Sink, SinkExt, Stream, StreamExt};
use snafu::prelude::*;
use tokio_tungstenite::tungstenite as websocket;

use super::{Frame, InflateError, Inflater, ParseFrameError};
use crate::ws::client::WebsocketClient;

/// Error when read/write frame stream/sink
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum FrameStreamSinkError {
    /// underlying websocket stream broken
    #[snafu(display("underlying websocket stream broken: {source}"))]
    Websocket {
        /// source error
        source: websocket::Error,
    },

    /// server closed the websocket
    #[snafu(display("websocket closed by server, code {code:?}: {reason}"))]
    Closed {
        /// close code, if the server sent one
        code: Option<u16>,
        /// close reason
        reason: String,
    },

    /// compressed stream is corrupted
    #[snafu(display("decompress frame failed: {source}"))]
    Decompress {
        /// source error
        source: InflateError,
    },

    /// parse frame data failed
    #[snafu(display("parse frame failed: {source}"))]
    ParseFrameFailed {
        /// source error
        source: ParseFrameError,
    },

    /// encode outgoing frame failed
    #[snafu(display("encode frame failed: {source}"))]
    EncodeFrameFailed {
        /// source error
        source: serde_json::Error,
    },
}

impl FrameStreamSinkError {
    /// Check if this error will make the stream/sink stop
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Websocket { .. } | Self::Closed { .. } | Self::Decompress { .. } => true,
            Self::ParseFrameFailed { .. } | Self::EncodeFrameFailed { .. } => false,
        }
    }
}

/// Gateway frame stream/sink over one websocket connection.
///
/// Binary frames go through the connection's zlib-stream [`Inflater`], text
/// frames are parsed as they are. Outgoing frames are always sent as text.
#[derive(Debug)]
pub struct FrameStreamSink {
    ws: WebsocketClient,
    inflater: Inflater,
}

impl FrameStreamSink {
    /// Construct a new stream with underlying websocket connection and a
    /// fresh decompressor.
    pub fn new(ws: WebsocketClient) -> Self {
        Self {
            ws,
            inflater: Inflater::new(),
        }
    }

    fn decode(data: &[u8]) -> Result<Frame, FrameStreamSinkError> {
        Frame::decode(data).map_err(|e| {
            log::trace!(
                "Parse failed frame data: {}",
                std::str::from_utf8(data).unwrap_or("<not-utf8-binary>")
            );
            FrameStreamSinkError::ParseFrameFailed { source: e }
        })
    }
}

impl Stream for FrameStreamSink {
    type Item = Result<Frame, FrameStreamSinkError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        loop {
            let message = match ready!(self.ws.poll_next_unpin(cx)) {
                None => return Poll::Ready(None),
                Some(Err(e)) => return Poll::Ready(Some(Err(e).context(error::Websocket))),
                Some(Ok(message)) => message,
            };

            let result = match message {
                websocket::Message::Text(text) => Self::decode(text.as_bytes()),
                websocket::Message::Binary(data) => match self.inflater.push(&data) {
                    Ok(Some(inflated)) => Self::decode(&inflated),
                    Ok(None) => continue,
                    Err(e) => Err(e).context(error::Decompress),
                },
                websocket::Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                        .unwrap_or_default();
                    error::Closed { code, reason }.fail()
                }
                _ => continue,
            };

            return Poll::Ready(Some(result));
        }
    }
}

impl Sink<Frame> for FrameStreamSink {
    type Error = FrameStreamSinkError;

    fn poll_ready(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_ready_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn start_send(mut self: std::pin::Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        let text = item.encode().context(error::EncodeFrameFailed)?;
        self.ws
            .start_send_unpin(websocket::Message::Text(text))
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_flush_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }

    fn poll_close(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        self.ws
            .poll_close_unpin(cx)
            .map_err(|e| Self::Error::Websocket { source: e })
    }
}
