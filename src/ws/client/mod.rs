//! Gateway connection engine of a single shard.

mod connection;
mod context;
mod error;
mod heartbeat;
mod processor;
mod promise;
mod ready;
mod sender;
mod session;

pub use connection::{
    Backoff, ConnectionState, INITIAL_RECONNECT_DELAY_MS, MAX_RECONNECT_DELAY_MS,
    RECONNECT_JITTER_MS,
};
pub use error::{GatewayError, SendError, FATAL_CLOSE_CODES};
pub use session::Session;

use std::{sync::Arc, time::Duration};

use snafu::prelude::*;
use tokio_tungstenite as websocket;

use crate::{
    api,
    cache::EntityCache,
    config::GatewayConfig,
    error as crate_error,
    filter::{self, Filter, FilterExt},
    shard::{IdentifyLock, ShardDescriptor},
    subscriber::{EventHub, Subscriber},
    ws::message::{OpCode, PresenceUpdate, RequestGuildMembers},
};
use connection::ConnectionHandler;
use context::ShardContext;
use error::send_error;
use sender::FrameSender;

pub(crate) type WebsocketClient =
    websocket::WebSocketStream<websocket::MaybeTlsStream<tokio::net::TcpStream>>;

/// One gateway connection, kept alive across reconnects and resumes.
///
/// A shard owns its connection manager, session, heartbeat and entity cache.
/// It can run on its own or as part of a [`ShardCoordinator`](crate::ShardCoordinator),
/// which shares its identify lock and event hub between shards.
#[derive(Debug, Clone)]
pub struct Shard {
    ctx: Arc<ShardContext>,
}

impl Shard {
    /// Create a standalone shard.
    ///
    /// The shard is the first of `config.shard_ids` (or 0) out of
    /// `config.total_shards` (or 1).
    pub fn new(config: GatewayConfig) -> crate::Result<Self> {
        let total_shards = config.total_shards.unwrap_or(1);
        let id = config
            .shard_ids
            .as_ref()
            .and_then(|ids| ids.first().copied())
            .unwrap_or(0);

        ensure!(
            total_shards > 0 && id < total_shards,
            crate_error::InvalidShardConfig {
                reason: format!("shard {} out of {} shards", id, total_shards),
            }
        );

        let api = api::Client::new_from_bot_token(&config.token)
            .and_then(|c| c.with_base_url(&config.api_base_url))
            .context(crate_error::CallAPIFailed)?;

        let identify = Arc::new(IdentifyLock::new(
            config.identify_max_concurrency.unwrap_or(1),
            config.identify_cushion(),
        ));
        let hub = Arc::new(EventHub::new(config.handler_timeout()));

        Ok(Self::from_parts(
            ShardDescriptor { id, total_shards },
            Arc::new(config),
            api,
            identify,
            hub,
        ))
    }

    pub(crate) fn from_parts(
        descriptor: ShardDescriptor,
        config: Arc<GatewayConfig>,
        api: api::Client,
        identify: Arc<IdentifyLock>,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            ctx: ShardContext::new(descriptor, config, api, identify, hub),
        }
    }

    /// Shard id
    pub fn id(&self) -> u32 {
        self.ctx.shard.id
    }

    /// Shard id and total shard count
    pub fn descriptor(&self) -> ShardDescriptor {
        self.ctx.shard
    }

    /// Start connecting in background, returns at once.
    ///
    /// Fails when the shard is not fully stopped.
    pub async fn start(&self) -> crate::Result<()> {
        ensure!(
            self.state().is_disconnected(),
            crate_error::AlreadyRunning { shard: self.id() }
        );

        self.ctx.stopped.send_replace(None);
        let handler: Arc<dyn ConnectionHandler> = self.ctx.clone();
        self.ctx.manager.start(handler).await;
        Ok(())
    }

    /// Stop the connection and wait until it is torn down
    pub async fn stop(&self) {
        log::info!("Shard {} stopping", self.id());
        self.ctx.manager.stop().await;

        // the run loop exits without a final disconnect when stopped while backing off
        self.ctx.stopped.send_if_modified(|stopped| {
            let unset = stopped.is_none();
            if unset {
                *stopped = Some(Arc::new(GatewayError::Cancelled));
            }
            unset
        });
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.ctx.manager.state()
    }

    /// Last measured heartbeat latency
    pub fn latency(&self) -> Option<Duration> {
        *self.ctx.latency.borrow()
    }

    /// Snapshot of the session
    pub fn session(&self) -> Session {
        self.ctx.session.borrow().clone()
    }

    /// Cache of the current session, replaced on every READY
    pub fn cache(&self) -> Arc<EntityCache> {
        self.ctx.cache.borrow().clone()
    }

    /// Guild warm up finished and the connection is up
    pub fn is_ready(&self) -> bool {
        *self.ctx.ready.borrow()
    }

    /// Identify lock this shard identifies under
    pub fn identify_lock(&self) -> &Arc<IdentifyLock> {
        &self.ctx.identify
    }

    /// Wait until the connection handshake finished
    pub async fn wait_connected(&self) {
        let mut rx = self.ctx.manager.watch_state();
        let _ = rx.wait_for(ConnectionState::is_connected).await;
    }

    /// Wait until the shard is ready.
    ///
    /// Fails with the error that ended the connection for good when the
    /// shard stops before it gets ready, including a local [`stop`](Self::stop).
    pub async fn wait_ready(&self) -> Result<(), Arc<GatewayError>> {
        let mut ready = self.ctx.ready.subscribe();
        let mut stopped = self.ctx.stopped.subscribe();

        tokio::select! {
            biased;

            result = ready.wait_for(|ready| *ready) => match result {
                Ok(_) => Ok(()),
                Err(_) => Err(Arc::new(GatewayError::Cancelled)),
            },
            result = stopped.wait_for(Option::is_some) => {
                let error = match result {
                    Ok(error) => error.clone(),
                    Err(_) => None,
                };
                Err(error.unwrap_or_else(|| Arc::new(GatewayError::Cancelled)))
            }
        }
    }

    async fn sender(&self) -> Result<FrameSender, SendError> {
        self.ctx.sender().await.context(send_error::NotConnected)
    }

    /// Update the presence of the current user
    pub async fn update_presence(&self, presence: &PresenceUpdate) -> Result<(), SendError> {
        self.sender()
            .await?
            .send_payload(OpCode::PresenceUpdate, presence)
            .await
    }

    /// Ask for guild member chunks, they arrive as `GUILD_MEMBERS_CHUNK` dispatches
    pub async fn request_guild_members(
        &self,
        request: &RequestGuildMembers,
    ) -> Result<(), SendError> {
        self.sender()
            .await?
            .send_payload(OpCode::RequestGuildMembers, request)
            .await
    }

    /// Subscribe to the events of this shard
    pub async fn subscribe<S: Subscriber + 'static>(&self, subscriber: Arc<S>) {
        self.ctx
            .hub
            .subscribe_filtered(subscriber, filter::shard(self.id()))
            .await
    }

    /// Subscribe to the events of this shard passing `filter`
    pub async fn subscribe_filtered<S, F>(&self, subscriber: Arc<S>, filter: F)
    where
        S: Subscriber + 'static,
        F: Filter + Send + Sync + 'static,
    {
        self.ctx
            .hub
            .subscribe_filtered(subscriber, filter::shard(self.id()).and(filter))
            .await
    }
}
