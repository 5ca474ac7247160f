use std::{
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use futures_util::StreamExt;
use snafu::prelude::*;
use tokio::{
    sync::{oneshot, watch, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite as websocket;
use tokio_util::sync::CancellationToken;

use super::{
    connection::{ConnectionHandler, ConnectionManager},
    error::{gateway_error, GatewayError},
    processor,
    ready::Warmup,
    sender::{self, FrameSender},
    Session,
};
use crate::{
    api::{self, types::GatewayURL},
    cache::EntityCache,
    config::GatewayConfig,
    shard::{IdentifyLock, ShardDescriptor},
    subscriber::EventHub,
    ws::{
        message::{FrameStreamSink, Hello, Identify, OpCode, Resume},
        Event,
    },
};

/// Tasks and handles that live exactly as long as one connection
#[derive(Debug)]
pub(crate) struct Connection {
    pub token: CancellationToken,
    pub sender: FrameSender,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

/// Everything one shard owns, shared by its connection tasks
#[derive(Debug)]
pub(crate) struct ShardContext {
    pub shard: ShardDescriptor,
    pub config: Arc<GatewayConfig>,
    pub api: api::Client,
    pub identify: Arc<IdentifyLock>,
    pub hub: Arc<EventHub>,
    pub manager: Arc<ConnectionManager>,
    pub session: watch::Sender<Session>,
    pub cache: watch::Sender<Arc<EntityCache>>,
    pub latency: watch::Sender<Option<Duration>>,
    pub ready: watch::Sender<bool>,
    pub warmup: watch::Sender<Warmup>,
    /// why the run loop gave up, `None` while it is running or retrying
    pub stopped: watch::Sender<Option<Arc<GatewayError>>>,
    pub connection: Mutex<Option<Connection>>,
    me: Weak<ShardContext>,
}

impl ShardContext {
    pub fn new(
        shard: ShardDescriptor,
        config: Arc<GatewayConfig>,
        api: api::Client,
        identify: Arc<IdentifyLock>,
        hub: Arc<EventHub>,
    ) -> Arc<Self> {
        let manager = Arc::new(ConnectionManager::new(shard.id, config.connection_timeout()));
        let cache = EntityCache::new(0, 0, config.message_cache_size);

        Arc::new_cyclic(|me| Self {
            shard,
            config,
            api,
            identify,
            hub,
            manager,
            session: watch::channel(Session::default()).0,
            cache: watch::channel(Arc::new(cache)).0,
            latency: watch::channel(None).0,
            ready: watch::channel(false).0,
            warmup: watch::channel(Warmup::default()).0,
            stopped: watch::channel(None).0,
            connection: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn identify_payload(&self) -> Identify {
        Identify {
            token: self.config.token.clone(),
            properties: self.config.properties.clone(),
            intents: self.config.intents,
            shard: Some([self.shard.id, self.shard.total_shards]),
            large_threshold: self.config.large_threshold,
            presence: self.config.presence.clone(),
        }
    }

    /// Identify under the identify lock, holding its bucket for the cushion afterwards
    pub async fn identify(&self, token: &CancellationToken, sender: &FrameSender) -> Result<(), Arc<GatewayError>> {
        let permit = self
            .within(token, self.identify.acquire(self.shard.id))
            .await??;

        log::debug!("Shard {} send identify", self.shard.id);

        sender
            .send_payload(OpCode::Identify, &self.identify_payload())
            .await
            .context(gateway_error::HandshakeSendFailed { what: "identify" })
            .map_err(Arc::new)?;

        permit.release_after_cushion();
        Ok(())
    }

    /// Run `fut` until it finishes, the connection is cancelled or the handshake fails
    async fn within<F: Future>(
        &self,
        token: &CancellationToken,
        fut: F,
    ) -> Result<F::Output, Arc<GatewayError>> {
        tokio::select! {
            biased;

            Err(e) = self.manager.wait_ready() => Err(e),
            _ = token.cancelled() => Err(Arc::new(GatewayError::Cancelled)),
            output = fut => Ok(output),
        }
    }

    async fn resolve_url(&self, resuming: bool) -> Result<url::Url, Arc<GatewayError>> {
        let session = self.session.borrow().clone();

        let raw = match (resuming, session.resume_url, &self.config.gateway_url, session.gateway_url) {
            (true, Some(resume), _, _) => resume,
            (_, _, Some(configured), _) => configured.clone(),
            (_, _, None, Some(cached)) => cached,
            (_, _, None, None) => {
                log::debug!("Shard {} getting gateway url...", self.shard.id);
                let info = self
                    .api
                    .gateway()
                    .await
                    .context(gateway_error::ResolveURLFailed)
                    .map_err(Arc::new)?;
                self.session
                    .send_modify(|s| s.gateway_url = Some(info.url.clone()));
                info.url
            }
        };

        let gateway: GatewayURL = raw
            .parse()
            .with_context(|_| gateway_error::InvalidURL { url: &raw })
            .map_err(Arc::new)?;

        Ok(gateway.url(self.config.api_version, self.config.compress))
    }

    async fn take_connection(&self) -> Option<Connection> {
        self.connection.lock().await.take()
    }

    /// Open the socket and start the reader and writer of a new connection
    async fn open(
        &self,
        token: &CancellationToken,
        url: &url::Url,
    ) -> Result<(FrameSender, oneshot::Receiver<Hello>), Arc<GatewayError>> {
        log::debug!("Shard {} connecting gateway: {}", self.shard.id, url);

        let connecting = Box::pin(websocket::connect_async(url.as_str()));
        let ws = match self.within(token, connecting).await? {
            Ok((ws, _)) => ws,
            Err(source) => {
                self.session.send_modify(|s| s.gateway_url = None);
                return Err(Arc::new(GatewayError::ConnectFailed {
                    url: url.to_string(),
                    source,
                }));
            }
        };

        let (sink, stream) = FrameStreamSink::new(ws).split();
        let (sender, writer) = sender::spawn_writer(sink, token.clone());
        let (hello_tx, hello_rx) = oneshot::channel::<Hello>();

        let ctx = self
            .me
            .upgrade()
            .ok_or_else(|| Arc::new(GatewayError::Cancelled))?;
        let reader = tokio::spawn(Box::pin(processor::run(
            ctx,
            stream,
            sender.clone(),
            token.clone(),
            hello_tx,
        )));

        *self.connection.lock().await = Some(Connection {
            token: token.clone(),
            sender: sender.clone(),
            reader,
            writer,
        });

        Ok((sender, hello_rx))
    }

    /// Wait for hello, then resume the session or identify a new one
    async fn handshake(
        &self,
        token: &CancellationToken,
        sender: &FrameSender,
        hello_rx: oneshot::Receiver<Hello>,
        resuming: bool,
    ) -> Result<(), Arc<GatewayError>> {
        let hello = self
            .within(token, hello_rx)
            .await?
            .map_err(|_| Arc::new(GatewayError::HandshakeAborted))?;

        log::debug!(
            "Shard {} got hello, heartbeat interval {}ms",
            self.shard.id,
            hello.heartbeat_interval
        );

        if !resuming {
            return Box::pin(self.identify(token, sender)).await;
        }

        let resume = {
            let session = self.session.borrow();
            Resume {
                token: self.config.token.clone(),
                session_id: session.session_id.clone().unwrap_or_default(),
                seq: session.last_sequence,
            }
        };

        log::debug!(
            "Shard {} resume session {} from sequence {}",
            self.shard.id,
            resume.session_id,
            resume.seq
        );

        sender
            .send_payload(OpCode::Resume, &resume)
            .await
            .context(gateway_error::HandshakeSendFailed { what: "resume" })
            .map_err(Arc::new)
    }

    /// Sender of the live connection
    pub async fn sender(&self) -> Option<FrameSender> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.sender.clone())
    }
}

#[async_trait::async_trait]
impl ConnectionHandler for ShardContext {
    async fn on_connecting(&self, token: CancellationToken) -> Result<(), Arc<GatewayError>> {
        let resuming = self.session.borrow().can_resume();
        let url = Box::pin(self.resolve_url(resuming)).await?;

        let (sender, hello_rx) = Box::pin(self.open(&token, &url)).await?;
        Box::pin(self.handshake(&token, &sender, hello_rx, resuming)).await?;

        self.manager.wait_ready().await
    }

    async fn on_connected(&self) {
        self.hub
            .publish(Event::Connected {
                shard: self.shard.id,
            })
            .await;
    }

    async fn on_disconnecting(&self, error: &GatewayError) {
        log::debug!("Shard {} tear down connection: {}", self.shard.id, error);

        self.ready.send_replace(false);

        if let Some(connection) = self.take_connection().await {
            connection.token.cancel();
            if let Err(e) = connection.reader.await {
                log::warn!("Shard {} frame reader ended abnormally: {}", self.shard.id, e);
            }
            if let Err(e) = connection.writer.await {
                log::warn!("Shard {} frame writer ended abnormally: {}", self.shard.id, e);
            }
        }

        let cache = self.cache.borrow().clone();
        for id in cache.guild_ids() {
            if let Some(guild) = cache.guild(id).filter(|g| g.is_available()) {
                self.hub
                    .publish(Event::GuildUnavailable {
                        shard: self.shard.id,
                        guild,
                    })
                    .await;
            }
        }
    }

    async fn on_disconnected(&self, error: Arc<GatewayError>, will_retry: bool) {
        if !will_retry {
            self.session.send_modify(Session::invalidate);
        }

        self.hub
            .publish(Event::Disconnected {
                shard: self.shard.id,
                error: Arc::clone(&error),
                will_retry,
            })
            .await;

        if !will_retry {
            self.stopped.send_replace(Some(error));
        }
    }
}

#[cfg(test)]
impl ShardContext {
    /// A context for shard 0 of 1 that is never started
    pub fn detached(config: GatewayConfig) -> Arc<Self> {
        let api = api::Client::new_from_bot_token(&config.token)
            .and_then(|c| c.with_base_url(&config.api_base_url))
            .unwrap();
        let identify = Arc::new(IdentifyLock::new(1, config.identify_cushion()));
        let hub = Arc::new(EventHub::new(config.handler_timeout()));

        Self::new(
            ShardDescriptor {
                id: 0,
                total_shards: 1,
            },
            Arc::new(config),
            api,
            identify,
            hub,
        )
    }
}
