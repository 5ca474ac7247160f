//! Event subscribers.

use std::{borrow::Cow, fmt, future::Future, sync::Arc, time::Duration};

use tokio::sync::RwLock;

use crate::{
    filter::{self, Filter},
    ws::Event,
};

/// Subscriber can be registered to a shard or coordinator and process events.
#[async_trait::async_trait]
pub trait Subscriber: Send + Sync {
    /// subscriber name
    fn name(&self) -> Cow<'static, str>;
    /// callback will be executed for every event that passes the filter
    async fn on_event(self: Arc<Self>, event: Arc<Event>);
}

#[async_trait::async_trait]
impl<F, Fut> Subscriber for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    fn name(&self) -> Cow<'static, str> {
        "Anonymous Fn Subscriber".into()
    }

    async fn on_event(self: Arc<Self>, event: Arc<Event>) {
        self(event).await
    }
}

struct Entry {
    subscriber: Arc<dyn Subscriber>,
    filter: Box<dyn Filter + Send + Sync>,
}

/// Multicast of events to registered subscribers.
///
/// Subscribers are called one after another in registration order, each call
/// is awaited before the next event is published. A subscriber slower than
/// the handler timeout is reported but still awaited.
pub struct EventHub {
    entries: RwLock<Vec<Arc<Entry>>>,
    handler_timeout: Option<Duration>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("handler_timeout", &self.handler_timeout)
            .finish_non_exhaustive()
    }
}

impl EventHub {
    /// Create a hub with no subscriber
    pub fn new(handler_timeout: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            handler_timeout,
        }
    }

    /// Register a subscriber for all events
    pub async fn subscribe<S: Subscriber + 'static>(&self, subscriber: Arc<S>) {
        self.subscribe_filtered(subscriber, filter::all()).await
    }

    /// Register a subscriber for events passing `filter`
    pub async fn subscribe_filtered<S, F>(&self, subscriber: Arc<S>, filter: F)
    where
        S: Subscriber + 'static,
        F: Filter + Send + Sync + 'static,
    {
        log::debug!("Subscriber {} registered", subscriber.name());

        self.entries.write().await.push(Arc::new(Entry {
            subscriber,
            filter: Box::new(filter),
        }));
    }

    /// Number of registered subscribers
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no subscriber is registered
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Deliver an event to every subscriber whose filter passes it
    pub async fn publish(&self, event: Event) {
        let entries: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.filter.filter_event(&event))
            .cloned()
            .collect();

        if entries.is_empty() {
            return;
        }

        log::trace!("Publish {} event to {} subscribers", event.name(), entries.len());

        let event = Arc::new(event);
        for entry in entries {
            let mut handling = Arc::clone(&entry.subscriber).on_event(Arc::clone(&event));

            match self.handler_timeout {
                Some(timeout) => {
                    if tokio::time::timeout(timeout, &mut handling).await.is_err() {
                        log::warn!(
                            "Subscriber {} is blocking on {} event for more than {:?}",
                            entry.subscriber.name(),
                            event.name(),
                            timeout
                        );
                        handling.await;
                    }
                }
                None => handling.await,
            }
        }
    }
}
