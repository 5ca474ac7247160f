use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{context::ShardContext, sender::FrameSender, GatewayError};
use crate::ws::message::Frame;

/// Heartbeat bookkeeping of one connection
#[derive(Debug)]
pub(crate) struct HeartbeatState {
    interval: Duration,
    pending: VecDeque<Instant>,
    last_ack: Option<Instant>,
    last_message: Instant,
    latency: Option<Duration>,
}

impl HeartbeatState {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            pending: VecDeque::new(),
            last_ack: None,
            last_message: now,
            latency: None,
        }
    }

    #[cfg(test)]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Any frame was received
    pub fn received(&mut self, now: Instant) {
        self.last_message = now;
    }

    /// A heartbeat is about to be sent
    pub fn sent(&mut self, now: Instant) {
        self.pending.push_back(now);
    }

    /// An ack arrived, it answers the oldest pending heartbeat
    pub fn acked(&mut self, now: Instant) -> Option<Duration> {
        let sent = self.pending.pop_front()?;
        let latency = now.saturating_duration_since(sent);
        self.last_ack = Some(now);
        self.latency = Some(latency);
        Some(latency)
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Acks are outstanding and nothing at all arrived for a whole interval
    pub fn is_stalled(&self, now: Instant) -> bool {
        !self.pending.is_empty() && now.saturating_duration_since(self.last_message) > self.interval
    }

    /// How long the stall has lasted beyond the interval
    pub fn stalled_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_message)
            .saturating_sub(self.interval)
    }

    /// Time since the last ack, none if no heartbeat was acked yet
    pub fn since_last_ack(&self, now: Instant) -> Option<Duration> {
        self.last_ack.map(|at| now.saturating_duration_since(at))
    }

    /// Time until the next heartbeat, compensated by the last latency
    pub fn next_delay(&self) -> Duration {
        self.interval
            .saturating_sub(self.latency.unwrap_or_default())
    }
}

/// Heartbeat loop of one connection, ends with the connection token
pub(crate) async fn run(
    ctx: Arc<ShardContext>,
    state: Arc<Mutex<HeartbeatState>>,
    sender: FrameSender,
    token: CancellationToken,
) {
    log::debug!("Shard {} heartbeat started", ctx.shard.id);

    let grace = ctx.config.heartbeat_stall_grace();

    loop {
        let now = Instant::now();
        let delay = {
            let mut state = state.lock().await;

            if state.is_stalled(now) {
                let warming_up = ctx.warmup.borrow().in_flight;
                if warming_up && state.stalled_for(now) <= grace {
                    log::debug!(
                        "Shard {} heartbeat ack late while guilds warm up, tolerated",
                        ctx.shard.id
                    );
                } else {
                    log::warn!(
                        "Shard {} server missed last heartbeat, last ack {:?} ago",
                        ctx.shard.id,
                        state.since_last_ack(now)
                    );
                    ctx.manager.error(Arc::new(GatewayError::HeartbeatMissed));
                    return;
                }
            }

            state.sent(now);
            state.next_delay()
        };

        let sequence = ctx.session.borrow().heartbeat_sequence();
        log::trace!("Shard {} send heartbeat with sequence {:?}", ctx.shard.id, sequence);

        if let Err(e) = sender.send(Frame::heartbeat(sequence)).await {
            log::warn!("Shard {} send heartbeat failed: {}", ctx.shard.id, e);
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    log::debug!("Shard {} heartbeat stopped", ctx.shard.id);
}
