use std::{sync::Arc, time::Duration};

use enum_as_inner::EnumAsInner;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::{promise::Promise, GatewayError};

/// First reconnect delay in milliseconds
pub const INITIAL_RECONNECT_DELAY_MS: u64 = 1_000;
/// Upper bound of the reconnect delay in milliseconds
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
/// Max absolute jitter added to each doubled delay, in milliseconds
pub const RECONNECT_JITTER_MS: i64 = 250;

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumAsInner)]
pub enum ConnectionState {
    /// not connected and not trying to
    Disconnected,
    /// socket connect and handshake in progress
    Connecting,
    /// handshake done, frames flowing
    Connected,
    /// tearing down the current connection
    Disconnecting,
}

/// Exponential reconnect backoff with jitter
#[derive(Debug)]
pub struct Backoff {
    next: u64,
    rng: StdRng,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    /// Create a backoff seeded from the OS
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a backoff with a given rng
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            next: INITIAL_RECONNECT_DELAY_MS,
            rng,
        }
    }

    /// Go back to the initial delay
    pub fn reset(&mut self) {
        self.next = INITIAL_RECONNECT_DELAY_MS;
    }

    /// Delay to wait now, advancing to the following one
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        let jitter = self.rng.gen_range(-RECONNECT_JITTER_MS..=RECONNECT_JITTER_MS);
        let doubled = (current as i64 * 2 + jitter).max(0) as u64;
        self.next = doubled.min(MAX_RECONNECT_DELAY_MS);
        Duration::from_millis(current)
    }
}

/// Callbacks the connection manager drives through each connection attempt
#[async_trait::async_trait]
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Open the transport and finish the handshake, observing `token`
    async fn on_connecting(&self, token: CancellationToken) -> Result<(), Arc<GatewayError>>;
    /// Handshake finished
    async fn on_connected(&self);
    /// Tear down everything the connection owns
    async fn on_disconnecting(&self, error: &GatewayError);
    /// Connection fully torn down
    async fn on_disconnected(&self, error: Arc<GatewayError>, will_retry: bool);
}

#[derive(Debug, Clone, Default)]
struct Scope {
    reconnect: CancellationToken,
    connection: CancellationToken,
    ready: Promise,
    connection_promise: Promise,
}

/// Supervisor that keeps one logical connection alive.
///
/// `start` spawns a loop that connects, waits until the connection fails,
/// tears it down and retries with [`Backoff`]. Recoverable errors only end the
/// current connection, critical errors also end the loop.
#[derive(Debug)]
pub(crate) struct ConnectionManager {
    shard: u32,
    timeout: Duration,
    state: watch::Sender<ConnectionState>,
    scope: watch::Sender<Scope>,
    run_lock: Arc<Mutex<()>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(shard: u32, timeout: Duration) -> Self {
        Self {
            shard,
            timeout,
            state: watch::channel(ConnectionState::Disconnected).0,
            scope: watch::channel(Scope::default()).0,
            run_lock: Arc::new(Mutex::new(())),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub async fn start(self: &Arc<Self>, handler: Arc<dyn ConnectionHandler>) {
        let guard = loop {
            self.stop().await;
            match Arc::clone(&self.run_lock).try_lock_owned() {
                Ok(guard) => break guard,
                Err(_) => {
                    log::trace!("Shard {} waiting previous run loop to release", self.shard);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };

        let reconnect = CancellationToken::new();
        self.scope.send_modify(|s| s.reconnect = reconnect.clone());

        log::debug!("Shard {} start run loop", self.shard);

        let manager = Arc::clone(self);
        let run = Box::pin(async move {
            manager.run(handler, reconnect).await;
            drop(guard);
        });
        let handle = tokio::spawn(run);

        *self.task.lock().await = Some(handle);
    }

    async fn run(&self, handler: Arc<dyn ConnectionHandler>, reconnect: CancellationToken) {
        let mut backoff = Backoff::new();

        while !reconnect.is_cancelled() {
            let result = match Box::pin(self.connect(handler.as_ref(), &reconnect)).await {
                Ok(()) => {
                    backoff.reset();
                    let promise = self.scope.borrow().connection_promise.clone();
                    promise.wait().await
                }
                Err(e) => Err(e),
            };

            let error = match result {
                Ok(()) => Arc::new(GatewayError::Cancelled),
                Err(e) => e,
            };

            self.error(Arc::clone(&error));

            let will_retry = !reconnect.is_cancelled();
            if will_retry {
                log::warn!("Shard {} connection lost: {}", self.shard, error);
            } else if error.is_cancelled() {
                log::debug!("Shard {} connection stopped", self.shard);
            } else {
                log::error!("Shard {} connection failed, giving up: {}", self.shard, error);
            }

            Box::pin(self.disconnect(handler.as_ref(), error, will_retry)).await;

            if !reconnect.is_cancelled() {
                let delay = backoff.next_delay();
                log::info!("Shard {} reconnecting in {:?}", self.shard, delay);
                tokio::select! {
                    _ = reconnect.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        log::debug!("Shard {} run loop stopped", self.shard);
    }

    async fn connect(
        &self,
        handler: &dyn ConnectionHandler,
        reconnect: &CancellationToken,
    ) -> Result<(), Arc<GatewayError>> {
        let connection = reconnect.child_token();
        let ready = Promise::new();

        self.scope.send_modify(|s| {
            s.connection = connection.clone();
            s.ready = ready.clone();
            s.connection_promise = Promise::new();
        });
        self.state.send_replace(ConnectionState::Connecting);

        log::info!("Shard {} connecting", self.shard);

        let timeout = self.timeout;
        let token = connection.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = ready.wait() => {}
                _ = tokio::time::sleep(timeout) => {
                    if ready.fail(Arc::new(GatewayError::Timeout)) {
                        log::warn!("Connection timeout after {:?}", timeout);
                    }
                }
            }
        });

        if let Err(e) = handler.on_connecting(connection).await {
            self.error(Arc::clone(&e));
            return Err(e);
        }

        log::info!("Shard {} connected", self.shard);
        self.state.send_replace(ConnectionState::Connected);
        handler.on_connected().await;

        Ok(())
    }

    async fn disconnect(
        &self,
        handler: &dyn ConnectionHandler,
        error: Arc<GatewayError>,
        will_retry: bool,
    ) {
        if self.state().is_disconnected() {
            return;
        }

        self.state.send_replace(ConnectionState::Disconnecting);
        log::debug!("Shard {} disconnecting", self.shard);

        handler.on_disconnecting(&error).await;

        self.state.send_replace(ConnectionState::Disconnected);
        log::info!("Shard {} disconnected", self.shard);

        handler.on_disconnected(error, will_retry).await;
    }

    /// Complete the handshake of the current connection
    pub fn complete(&self) {
        self.scope.borrow().ready.complete();
    }

    /// Wait for the handshake of the current connection
    pub async fn wait_ready(&self) -> Result<(), Arc<GatewayError>> {
        let ready = self.scope.borrow().ready.clone();
        ready.wait().await
    }

    /// End the current connection, the loop will retry
    pub fn error(&self, error: Arc<GatewayError>) {
        let scope = self.scope.borrow().clone();
        scope.ready.fail(Arc::clone(&error));
        scope.connection_promise.fail(error);
        scope.connection.cancel();
    }

    /// End the current connection and the loop
    pub fn critical_error(&self, error: Arc<GatewayError>) {
        self.scope.borrow().reconnect.cancel();
        self.error(error);
    }

    /// Cancel everything without waiting
    pub fn cancel(&self) {
        let scope = self.scope.borrow().clone();
        let cancelled = Arc::new(GatewayError::Cancelled);
        scope.ready.fail(Arc::clone(&cancelled));
        scope.connection_promise.fail(cancelled);
        scope.reconnect.cancel();
        scope.connection.cancel();
    }

    /// Cancel everything and wait for the loop to finish
    pub async fn stop(&self) {
        self.cancel();

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::warn!("Shard {} run loop ended abnormally: {}", self.shard, e);
            }
        }
    }
}
