#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use miniz_oxide::{
    deflate::core::{create_comp_flags_from_zip_params, CompressorOxide},
    deflate::stream::deflate,
    MZFlush,
};
use serde_json::{json, Value};
use shardgate::{Event, GatewayConfig, Subscriber};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};
use tokio_tungstenite::{
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    WebSocketStream,
};

const WAIT: Duration = Duration::from_secs(15);

pub fn init_log() {
    let _ = pretty_env_logger::try_init();
}

/// In process gateway server, every accepted websocket is handed to the test
pub struct MockGateway {
    url: String,
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let uri = Arc::new(Mutex::new(String::new()));
                let seen = Arc::clone(&uri);
                let callback =
                    move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                        *seen.lock().unwrap() = request.uri().to_string();
                        Ok(response)
                    };

                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    continue;
                };

                let uri = uri.lock().unwrap().clone();
                if tx.send(MockConnection::new(ws, uri)).is_err() {
                    break;
                }
            }
        });

        Self { url, connections }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next connection from a client, panics if none arrives in time
    pub async fn accept(&mut self) -> MockConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection in time")
            .expect("server stopped")
    }

    /// Next connection within `wait`, if any
    pub async fn try_accept(&mut self, wait: Duration) -> Option<MockConnection> {
        timeout(wait, self.connections.recv()).await.ok().flatten()
    }
}

/// Server side of one client connection
pub struct MockConnection {
    ws: WebSocketStream<TcpStream>,
    compressor: Option<CompressorOxide>,
    pub uri: String,
}

impl MockConnection {
    fn new(ws: WebSocketStream<TcpStream>, uri: String) -> Self {
        Self {
            ws,
            compressor: None,
            uri,
        }
    }

    /// Send every following frame through one zlib stream
    pub fn compress(&mut self) {
        self.compressor = Some(CompressorOxide::new(create_comp_flags_from_zip_params(6, 15, 0)));
    }

    fn deflate(compressor: &mut CompressorOxide, data: &[u8]) -> Vec<u8> {
        let mut out = vec![0; data.len() * 2 + 64];
        let result = deflate(compressor, data, &mut out, MZFlush::Sync);
        assert_eq!(result.bytes_consumed, data.len());
        out.truncate(result.bytes_written);
        out
    }

    pub async fn send(&mut self, frame: Value) {
        let text = frame.to_string();
        match &mut self.compressor {
            Some(compressor) => {
                let data = Self::deflate(compressor, text.as_bytes());
                let (head, tail) = data.split_at(data.len() / 2);
                self.ws.send(Message::Binary(head.to_vec())).await.unwrap();
                self.ws.send(Message::Binary(tail.to_vec())).await.unwrap();
            }
            None => self.ws.send(Message::Text(text)).await.unwrap(),
        }
    }

    pub async fn hello(&mut self, heartbeat_interval: u64) {
        self.send(json!({ "op": 10, "d": { "heartbeat_interval": heartbeat_interval } }))
            .await;
    }

    pub async fn dispatch(&mut self, seq: u64, name: &str, d: Value) {
        self.send(json!({ "op": 0, "s": seq, "t": name, "d": d })).await;
    }

    /// Read frames until one with `op` arrives, acking heartbeats on the way
    pub async fn expect(&mut self, op: u64) -> Value {
        timeout(WAIT, async {
            loop {
                let message = self
                    .ws
                    .next()
                    .await
                    .expect("client closed")
                    .expect("read failed");

                let Message::Text(text) = message else {
                    continue;
                };

                let frame: Value = serde_json::from_str(&text).unwrap();
                let frame_op = frame["op"].as_u64().unwrap();

                if frame_op == op {
                    return frame;
                }

                if frame_op == 1 {
                    self.send(json!({ "op": 11 })).await;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no op {} frame in time", op))
    }

    pub async fn close(&mut self, code: u16, reason: &str) {
        let _ = self
            .ws
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            }))
            .await;
    }
}

pub fn config(url: &str) -> GatewayConfig {
    GatewayConfig {
        gateway_url: Some(url.to_string()),
        compress: false,
        total_shards: Some(1),
        identify_max_concurrency: Some(1),
        identify_cushion_ms: 100,
        ready_quiet_period_ms: 300,
        connection_timeout_ms: 10_000,
        handler_timeout_ms: None,
        ..GatewayConfig::new("test-token")
    }
}

pub fn ready_payload(session_id: &str, resume_url: &str, guilds: Value) -> Value {
    json!({
        "v": 10,
        "user": { "id": "1000", "username": "shardgate", "bot": true },
        "guilds": guilds,
        "session_id": session_id,
        "resume_gateway_url": resume_url,
        "private_channels": [],
    })
}

/// Subscriber forwarding every event into a channel
pub struct Recorder {
    tx: mpsc::UnboundedSender<Arc<Event>>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, EventLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), EventLog { rx })
    }
}

#[async_trait::async_trait]
impl Subscriber for Recorder {
    fn name(&self) -> std::borrow::Cow<'static, str> {
        "recorder".into()
    }

    async fn on_event(self: Arc<Self>, event: Arc<Event>) {
        let _ = self.tx.send(event);
    }
}

pub struct EventLog {
    rx: mpsc::UnboundedReceiver<Arc<Event>>,
}

impl EventLog {
    /// Skip events until one matches
    pub async fn wait_for<F: Fn(&Event) -> bool>(&mut self, f: F) -> Arc<Event> {
        timeout(WAIT, async {
            loop {
                let event = self.rx.recv().await.expect("event hub dropped");
                if f(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("expected event not published in time")
    }

    /// Gather events until `done` holds for everything gathered so far
    pub async fn collect_until<F: Fn(&[Arc<Event>]) -> bool>(&mut self, done: F) -> Vec<Arc<Event>> {
        let mut seen = Vec::new();
        timeout(WAIT, async {
            while !done(&seen) {
                seen.push(self.rx.recv().await.expect("event hub dropped"));
            }
        })
        .await
        .expect("expected events not published in time");
        seen
    }
}

pub fn is_dispatch(event: &Event, event_name: &str) -> bool {
    matches!(event, Event::Dispatch { name, .. } if name == event_name)
}
