use std::{sync::Arc, time::Duration};

use futures_util::{stream::SplitSink, Sink, SinkExt};
use snafu::prelude::*;
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use super::error::{send_error, SendError};
use crate::ws::message::{Frame, FrameStreamSinkError, OpCode};

const SEND_QUEUE_SIZE: usize = 64;

/// Rate limit bucket an outgoing frame is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bucket {
    /// everything except heartbeats, 117 per minute leaving room for heartbeats
    Unbucketed,
    /// identify, 1 per 5 seconds
    Identify,
    /// presence update, 5 per minute on top of the unbucketed limit
    PresenceUpdate,
}

impl Bucket {
    fn for_op(op: OpCode) -> Option<Self> {
        match op {
            OpCode::Heartbeat => None,
            OpCode::Identify => Some(Self::Identify),
            OpCode::PresenceUpdate => Some(Self::PresenceUpdate),
            _ => Some(Self::Unbucketed),
        }
    }
}

/// Fixed window counter
#[derive(Debug)]
pub(crate) struct RateWindow {
    limit: u32,
    period: Duration,
    window_start: Option<Instant>,
    used: u32,
}

impl RateWindow {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self {
            limit,
            period,
            window_start: None,
            used: 0,
        }
    }

    /// Take a slot now, or tell when the current window ends
    pub fn try_take(&mut self, now: Instant) -> Result<(), Instant> {
        match self.window_start {
            Some(start) if now < start + self.period => {}
            _ => {
                self.window_start = Some(now);
                self.used = 0;
            }
        }

        if self.used < self.limit {
            self.used += 1;
            Ok(())
        } else {
            Err(self.window_start.map(|s| s + self.period).unwrap_or(now))
        }
    }

    pub async fn take(&mut self) {
        while let Err(until) = self.try_take(Instant::now()) {
            log::debug!("Send rate limit reached, wait until {:?}", until);
            tokio::time::sleep_until(until).await;
        }
    }
}

#[derive(Debug)]
struct SendLimits {
    unbucketed: Mutex<RateWindow>,
    identify: Mutex<RateWindow>,
    presence: Mutex<RateWindow>,
}

impl Default for SendLimits {
    fn default() -> Self {
        Self {
            unbucketed: Mutex::new(RateWindow::new(117, Duration::from_secs(60))),
            identify: Mutex::new(RateWindow::new(1, Duration::from_secs(5))),
            presence: Mutex::new(RateWindow::new(5, Duration::from_secs(60))),
        }
    }
}

impl SendLimits {
    async fn take(&self, bucket: Bucket) {
        match bucket {
            Bucket::Unbucketed => self.unbucketed.lock().await.take().await,
            Bucket::Identify => self.identify.lock().await.take().await,
            Bucket::PresenceUpdate => {
                self.presence.lock().await.take().await;
                self.unbucketed.lock().await.take().await;
            }
        }
    }
}

#[derive(Debug)]
struct SendRequest {
    frame: Frame,
    done: oneshot::Sender<Result<(), SendError>>,
}

/// Handle to the send queue of one connection.
///
/// Frames are rate limited per [`Bucket`] before they enter the queue, then
/// written in queue order by a single writer task.
#[derive(Debug, Clone)]
pub(crate) struct FrameSender {
    tx: mpsc::Sender<SendRequest>,
    limits: Arc<SendLimits>,
    token: CancellationToken,
}

impl FrameSender {
    /// Queue a frame and wait until it was written
    pub async fn send(&self, frame: Frame) -> Result<(), SendError> {
        let op = frame.op;

        if let Some(bucket) = Bucket::for_op(op) {
            tokio::select! {
                _ = self.token.cancelled() => return send_error::Closed.fail(),
                _ = self.limits.take(bucket) => {}
            }
        }

        let (done, result) = oneshot::channel();
        self.tx
            .send(SendRequest { frame, done })
            .await
            .map_err(|_| send_error::Closed.build())?;

        log::trace!("Queued {:?} frame", op);

        result.await.map_err(|_| send_error::Closed.build())?
    }

    /// Build a frame from a typed payload and send it
    pub async fn send_payload<T: serde::Serialize>(
        &self,
        op: OpCode,
        payload: &T,
    ) -> Result<(), SendError> {
        let frame = Frame::with_payload(op, payload).context(send_error::Encode)?;
        self.send(frame).await
    }
}

/// Spawn the writer task owning the sink half of a connection
pub(crate) fn spawn_writer<S>(
    mut sink: SplitSink<S, Frame>,
    token: CancellationToken,
) -> (FrameSender, JoinHandle<()>)
where
    S: Sink<Frame, Error = FrameStreamSinkError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<SendRequest>(SEND_QUEUE_SIZE);

    let sender = FrameSender {
        tx,
        limits: Arc::new(SendLimits::default()),
        token: token.clone(),
    };

    let handle = tokio::spawn(async move {
        log::debug!("Frame writer start");

        loop {
            let request = tokio::select! {
                biased;

                _ = token.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let result = sink.send(request.frame).await;
            let fatal = matches!(&result, Err(e) if e.is_fatal());
            let _ = request
                .done
                .send(result.map_err(|source| SendError::Write { source }));

            if fatal {
                log::debug!("Frame writer find sink broken, stop");
                break;
            }
        }

        rx.close();
        while let Ok(request) = rx.try_recv() {
            let _ = request.done.send(send_error::Closed.fail());
        }

        if let Err(e) = sink.close().await {
            log::trace!("Close sink failed: {}", e);
        }

        log::debug!("Frame writer stopped");
    });

    (sender, handle)
}
