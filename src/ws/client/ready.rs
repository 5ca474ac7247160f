use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::context::ShardContext;
use crate::ws::Event;

/// Progress of the guild warm up that follows READY
#[derive(Debug, Clone)]
pub(crate) struct Warmup {
    /// guilds announced unavailable in READY that have not arrived yet
    pub unavailable: usize,
    /// when the last guild arrived, or READY itself
    pub last_guild_at: Instant,
    /// a warm up waiter is running
    pub in_flight: bool,
    /// bumped by every READY, a waiter only finishes its own round
    pub round: u64,
}

impl Default for Warmup {
    fn default() -> Self {
        Self {
            unavailable: 0,
            last_guild_at: Instant::now(),
            in_flight: false,
            round: 0,
        }
    }
}

impl Warmup {
    /// Begin a new round waiting for `unavailable` guilds
    pub fn restart(&mut self, unavailable: usize, now: Instant) {
        self.unavailable = unavailable;
        self.last_guild_at = now;
        self.in_flight = true;
        self.round += 1;
    }

    pub fn guild_arrived(&mut self, now: Instant) {
        self.unavailable = self.unavailable.saturating_sub(1);
        self.last_guild_at = now;
    }

    /// Every guild arrived or none did for a whole quiet period
    pub fn is_done(&self, now: Instant, quiet_period: Duration) -> bool {
        self.unavailable == 0 || now.saturating_duration_since(self.last_guild_at) >= quiet_period
    }
}

/// Wait for the guilds of READY, then mark the shard ready.
///
/// Gives up silently when a later READY starts another round.
pub(crate) async fn wait_for_guilds(ctx: Arc<ShardContext>, token: CancellationToken, round: u64) {
    let quiet_period = ctx.config.ready_quiet_period();
    let mut warmup = ctx.warmup.subscribe();

    log::debug!("Shard {} guild warm up {} started", ctx.shard.id, round);

    loop {
        let deadline = {
            let current = warmup.borrow_and_update();
            if current.round != round {
                log::debug!("Shard {} guild warm up {} superseded", ctx.shard.id, round);
                return;
            }
            if current.is_done(Instant::now(), quiet_period) {
                break;
            }
            current.last_guild_at + quiet_period
        };

        tokio::select! {
            _ = token.cancelled() => {
                ctx.warmup.send_if_modified(|w| {
                    let own = w.round == round;
                    if own {
                        w.in_flight = false;
                    }
                    own
                });
                log::debug!("Shard {} guild warm up cancelled", ctx.shard.id);
                return;
            }
            changed = warmup.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }

    let mut missing = None;
    ctx.warmup.send_if_modified(|w| {
        if w.round != round {
            return false;
        }
        w.in_flight = false;
        missing = Some(w.unavailable);
        true
    });

    let Some(missing) = missing else {
        return;
    };

    if missing > 0 {
        log::warn!(
            "Shard {} ready with {} guilds still unavailable",
            ctx.shard.id,
            missing
        );
    } else {
        log::debug!("Shard {} all guilds arrived", ctx.shard.id);
    }

    ctx.ready.send_replace(true);
    ctx.hub.publish(Event::Ready { shard: ctx.shard.id }).await;
}
