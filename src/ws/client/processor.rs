use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use super::{
    context::ShardContext,
    heartbeat::{self, HeartbeatState},
    ready,
    sender::FrameSender,
    GatewayError, Session,
};
use crate::{
    cache::{Channel, EntityCache, Guild, Message, User},
    snowflake::Snowflake,
    ws::{
        message::{
            Frame, FrameStreamSinkError, GuildMemberAdd, Hello, MessageDelete, OpCode,
            ParseFrameError, Ready,
        },
        Event,
    },
};

struct Processor {
    ctx: Arc<ShardContext>,
    sender: FrameSender,
    token: CancellationToken,
    hello: Option<oneshot::Sender<Hello>>,
    heartbeat: Option<(Arc<Mutex<HeartbeatState>>, JoinHandle<()>)>,
}

/// Read frames of one connection until it ends, reporting how it ended to
/// the connection manager
pub(crate) async fn run<S>(
    ctx: Arc<ShardContext>,
    mut stream: S,
    sender: FrameSender,
    token: CancellationToken,
    hello: oneshot::Sender<Hello>,
) where
    S: Stream<Item = Result<Frame, FrameStreamSinkError>> + Unpin + Send,
{
    let shard = ctx.shard.id;
    let mut processor = Processor {
        ctx,
        sender,
        token: token.clone(),
        hello: Some(hello),
        heartbeat: None,
    };

    log::debug!("Shard {} frame reader started", shard);

    loop {
        let item = tokio::select! {
            biased;

            _ = token.cancelled() => break,
            item = stream.next() => item,
        };

        match item {
            Some(Ok(frame)) => processor.handle(frame).await,
            Some(Err(e)) if !e.is_fatal() => {
                log::warn!("Shard {} skip bad frame: {}", shard, e);
            }
            Some(Err(source)) => {
                let error = Arc::new(GatewayError::Stream { source });
                if error.is_fatal() {
                    log::error!("Shard {} closed by server, will not retry: {}", shard, error);
                    processor.ctx.manager.critical_error(error);
                } else {
                    processor.ctx.manager.error(error);
                }
                break;
            }
            None => {
                processor
                    .ctx
                    .manager
                    .error(Arc::new(GatewayError::StreamEnded));
                break;
            }
        }
    }

    if let Some((_, task)) = processor.heartbeat.take() {
        task.abort();
    }

    log::debug!("Shard {} frame reader stopped", shard);
}

impl Processor {
    fn shard(&self) -> u32 {
        self.ctx.shard.id
    }

    fn cache(&self) -> Arc<EntityCache> {
        self.ctx.cache.borrow().clone()
    }

    async fn publish(&self, event: Event) {
        self.ctx.hub.publish(event).await;
    }

    async fn handle(&mut self, frame: Frame) {
        let now = Instant::now();
        if let Some((state, _)) = &self.heartbeat {
            state.lock().await.received(now);
        }

        log::trace!("Shard {} receive {:?} frame", self.shard(), frame.op);

        match frame.op {
            OpCode::Hello => self.on_hello(&frame),
            OpCode::Heartbeat => self.on_heartbeat_request(now).await,
            OpCode::HeartbeatAck => self.on_heartbeat_ack(now).await,
            OpCode::InvalidSession => self.on_invalid_session(),
            OpCode::Reconnect => {
                log::info!("Shard {} server requested reconnect", self.shard());
                self.ctx
                    .manager
                    .error(Arc::new(GatewayError::ReconnectRequested));
            }
            OpCode::Dispatch => Box::pin(self.on_dispatch(frame)).await,
            op => log::debug!("Shard {} ignore unexpected {:?} frame", self.shard(), op),
        }
    }

    fn on_hello(&mut self, frame: &Frame) {
        let hello: Hello = match frame.payload() {
            Ok(hello) => hello,
            Err(e) => {
                log::warn!("Shard {} bad hello frame: {}", self.shard(), e);
                return;
            }
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        let state = Arc::new(Mutex::new(HeartbeatState::new(interval, Instant::now())));

        if let Some((_, previous)) = self.heartbeat.take() {
            previous.abort();
        }

        let task = tokio::spawn(heartbeat::run(
            Arc::clone(&self.ctx),
            Arc::clone(&state),
            self.sender.clone(),
            self.token.clone(),
        ));
        self.heartbeat = Some((state, task));

        if let Some(tx) = self.hello.take() {
            let _ = tx.send(hello);
        }
    }

    async fn on_heartbeat_request(&self, now: Instant) {
        log::debug!("Shard {} server requested heartbeat", self.shard());

        if let Some((state, _)) = &self.heartbeat {
            state.lock().await.sent(now);
        }

        let sequence = self.ctx.session.borrow().heartbeat_sequence();
        if let Err(e) = self.sender.send(Frame::heartbeat(sequence)).await {
            log::warn!("Shard {} send requested heartbeat failed: {}", self.shard(), e);
        }
    }

    async fn on_heartbeat_ack(&self, now: Instant) {
        let latency = match &self.heartbeat {
            Some((state, _)) => state.lock().await.acked(now),
            None => None,
        };

        let Some(after) = latency else {
            log::debug!("Shard {} unexpected heartbeat ack", self.shard());
            return;
        };

        log::trace!("Shard {} heartbeat latency {:?}", self.shard(), after);

        let before = self.ctx.latency.send_replace(Some(after));
        self.publish(Event::LatencyUpdated {
            shard: self.shard(),
            before,
            after,
        })
        .await;
    }

    fn on_invalid_session(&self) {
        log::info!("Shard {} session invalidated, identify again", self.shard());

        self.ctx.session.send_modify(Session::invalidate);

        let ctx = Arc::clone(&self.ctx);
        let sender = self.sender.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            if let Err(e) = ctx.identify(&token, &sender).await {
                if !e.is_cancelled() {
                    ctx.manager.error(e);
                }
            }
        });
    }

    async fn on_dispatch(&self, frame: Frame) {
        let sequence = frame.s;
        if let Some(s) = sequence {
            self.ctx.session.send_if_modified(|session| session.advance(s));
        }

        let Some(name) = frame.t.clone() else {
            log::warn!("Shard {} dispatch frame without event name", self.shard());
            return;
        };

        if let Err(e) = self.route(&name, &frame).await {
            log::warn!("Shard {} handle {} failed: {}", self.shard(), name, e);
        }

        self.publish(Event::Dispatch {
            shard: self.shard(),
            name,
            sequence,
            payload: Arc::new(frame.d),
        })
        .await;
    }

    async fn route(&self, name: &str, frame: &Frame) -> Result<(), ParseFrameError> {
        let cache = self.cache();

        match name {
            "READY" => self.on_ready(frame.payload()?).await,
            "RESUMED" => self.on_resumed().await,
            "GUILD_CREATE" => self.on_guild_create(frame.payload()?).await,
            "GUILD_UPDATE" => {
                let guild: Guild = frame.payload()?;
                if self.known_guild(&cache, name, guild.id) {
                    cache.add_guild(guild);
                }
            }
            "GUILD_DELETE" => {
                let guild: Guild = frame.payload()?;
                if self.known_guild(&cache, name, guild.id) {
                    self.on_guild_delete(guild).await;
                }
            }
            "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
                let channel: Channel = frame.payload()?;
                let owner_known = match channel.guild_id {
                    Some(guild_id) => self.known_guild(&cache, name, guild_id),
                    None => true,
                };
                if owner_known {
                    cache.add_channel(channel);
                }
            }
            "CHANNEL_DELETE" => {
                let channel: Channel = frame.payload()?;
                if self.known_channel(&cache, name, channel.id) {
                    cache.remove_channel(channel.id);
                }
            }
            "GUILD_MEMBER_ADD" => {
                let added: GuildMemberAdd = frame.payload()?;
                if self.known_guild(&cache, name, added.guild_id) {
                    cache.add_user(added.user);
                }
            }
            "USER_UPDATE" => {
                cache.add_user(frame.payload::<User>()?);
            }
            "MESSAGE_CREATE" => {
                let message: Message = frame.payload()?;
                if self.known_channel(&cache, name, message.channel_id) {
                    cache.add_message(message);
                }
            }
            "MESSAGE_DELETE" => {
                let deleted: MessageDelete = frame.payload()?;
                if self.known_channel(&cache, name, deleted.channel_id) {
                    cache.remove_message(deleted.channel_id, deleted.id);
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn known_guild(&self, cache: &EntityCache, event: &str, id: Snowflake) -> bool {
        let known = cache.guild(id).is_some();
        if !known {
            log::warn!("Shard {} {} for unknown guild {}, dropped", self.shard(), event, id);
        }
        known
    }

    fn known_channel(&self, cache: &EntityCache, event: &str, id: Snowflake) -> bool {
        let known = cache.channel(id).is_some();
        if !known {
            log::warn!("Shard {} {} for unknown channel {}, dropped", self.shard(), event, id);
        }
        known
    }

    async fn on_ready(&self, ready: Ready) {
        let cache = Arc::new(EntityCache::new(
            ready.guilds.len(),
            ready.private_channels.len(),
            self.ctx.config.message_cache_size,
        ));

        let unavailable = ready.guilds.iter().filter(|g| !g.is_available()).count();

        log::info!(
            "Shard {} ready as {}, session {}, {} guilds pending",
            self.shard(),
            ready.user.username,
            ready.session_id,
            unavailable
        );

        cache.add_user(ready.user);
        let available: Vec<_> = ready
            .guilds
            .into_iter()
            .map(|guild| cache.add_guild(guild))
            .filter(|guild| guild.is_available())
            .collect();
        for channel in ready.private_channels {
            cache.add_channel(channel);
        }

        self.ctx.cache.send_replace(cache);
        self.ctx
            .session
            .send_modify(|s| s.established(ready.session_id, ready.resume_gateway_url));
        let mut round = 0;
        self.ctx.warmup.send_modify(|w| {
            w.restart(unavailable, Instant::now());
            round = w.round;
        });

        self.ctx.manager.complete();

        for guild in available {
            self.publish(Event::GuildAvailable {
                shard: self.shard(),
                guild,
            })
            .await;
        }

        tokio::spawn(ready::wait_for_guilds(
            Arc::clone(&self.ctx),
            self.token.clone(),
            round,
        ));
    }

    async fn on_resumed(&self) {
        log::info!("Shard {} session resumed", self.shard());

        self.ctx.manager.complete();

        let cache = self.cache();
        for id in cache.guild_ids() {
            if let Some(guild) = cache.guild(id).filter(|g| g.is_available()) {
                self.publish(Event::GuildAvailable {
                    shard: self.shard(),
                    guild,
                })
                .await;
            }
        }

        self.ctx.ready.send_replace(true);
    }

    async fn on_guild_create(&self, guild: Guild) {
        let cache = self.cache();
        let known = cache.guild(guild.id);
        let available = guild.is_available();
        let guild = cache.add_guild(guild);

        if !available {
            return;
        }

        let event = match known {
            Some(old) if old.is_available() => return,
            Some(_) => {
                self.ctx.warmup.send_if_modified(|w| {
                    if w.in_flight {
                        w.guild_arrived(Instant::now());
                    }
                    w.in_flight
                });
                Event::GuildAvailable {
                    shard: self.shard(),
                    guild,
                }
            }
            None => Event::JoinedGuild {
                shard: self.shard(),
                guild,
            },
        };

        self.publish(event).await;
    }

    async fn on_guild_delete(&self, guild: Guild) {
        let cache = self.cache();
        let id = guild.id;

        if guild.unavailable {
            cache.update_guild(id, |g| g.unavailable = true);
            let guild = cache.guild(id).unwrap_or_else(|| Arc::new(guild));
            self.publish(Event::GuildUnavailable {
                shard: self.shard(),
                guild,
            })
            .await;
        } else {
            let removed = cache.remove_guild(id).unwrap_or(guild);
            self.publish(Event::LeftGuild {
                shard: self.shard(),
                guild: Arc::new(removed),
            })
            .await;
        }
    }
}
