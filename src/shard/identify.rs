use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::ws::client::GatewayError;

/// Cross shard identify rate limit.
///
/// Shards are spread over `max_concurrency` buckets by `shard_id %
/// max_concurrency`; each bucket lets one identify through at a time, waiters
/// are served in FIFO order.
#[derive(Debug)]
pub struct IdentifyLock {
    buckets: Vec<Arc<Semaphore>>,
    cushion: Duration,
    acquisitions: AtomicU64,
}

impl IdentifyLock {
    /// Create a lock with `max_concurrency` buckets
    pub fn new(max_concurrency: u32, cushion: Duration) -> Self {
        let buckets = (0..max_concurrency.max(1))
            .map(|_| Arc::new(Semaphore::new(1)))
            .collect();

        Self {
            buckets,
            cushion,
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Number of buckets
    pub fn max_concurrency(&self) -> u32 {
        self.buckets.len() as u32
    }

    /// Total permits handed out so far
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    fn bucket(&self, shard_id: u32) -> &Arc<Semaphore> {
        &self.buckets[shard_id as usize % self.buckets.len()]
    }

    /// Wait for the bucket of `shard_id`
    pub async fn acquire(&self, shard_id: u32) -> Result<IdentifyPermit, GatewayError> {
        log::trace!("Shard {} waiting identify lock", shard_id);

        let permit = Arc::clone(self.bucket(shard_id))
            .acquire_owned()
            .await
            .map_err(|_| GatewayError::IdentifyLockClosed)?;

        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        log::debug!("Shard {} acquired identify lock", shard_id);

        Ok(IdentifyPermit {
            shard_id,
            cushion: self.cushion,
            permit,
        })
    }

    /// Refuse every current and future waiter
    pub fn close(&self) {
        for bucket in &self.buckets {
            bucket.close();
        }
    }
}

/// Right to send one identify.
///
/// Dropping it frees the bucket at once, use
/// [`release_after_cushion`](Self::release_after_cushion) after a successful
/// identify.
#[derive(Debug)]
pub struct IdentifyPermit {
    shard_id: u32,
    cushion: Duration,
    permit: OwnedSemaphorePermit,
}

impl IdentifyPermit {
    /// Keep the bucket for the cushion, then free it
    pub fn release_after_cushion(self) {
        let Self {
            shard_id,
            cushion,
            permit,
        } = self;

        tokio::spawn(async move {
            tokio::time::sleep(cushion).await;
            drop(permit);
            log::trace!("Shard {} released identify lock", shard_id);
        });
    }
}
