use std::sync::Arc;

use enum_as_inner::EnumAsInner;
use tokio::sync::watch;

use super::GatewayError;

#[derive(Debug, Clone, EnumAsInner)]
pub(crate) enum PromiseState {
    Pending,
    Fulfilled,
    Failed(Arc<GatewayError>),
}

/// One shot completion signal that any number of tasks can wait on.
///
/// Only the first `complete`/`fail` takes effect.
#[derive(Debug, Clone)]
pub(crate) struct Promise {
    tx: Arc<watch::Sender<PromiseState>>,
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

impl Promise {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::channel(PromiseState::Pending).0),
        }
    }

    fn settle(&self, state: PromiseState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_pending() {
                *current = state;
                true
            } else {
                false
            }
        })
    }

    pub fn complete(&self) -> bool {
        self.settle(PromiseState::Fulfilled)
    }

    pub fn fail(&self, error: Arc<GatewayError>) -> bool {
        self.settle(PromiseState::Failed(error))
    }

    #[cfg(test)]
    pub fn is_settled(&self) -> bool {
        !self.tx.borrow().is_pending()
    }

    pub async fn wait(&self) -> Result<(), Arc<GatewayError>> {
        let mut rx = self.tx.subscribe();
        let state = match rx.wait_for(|s| !s.is_pending()).await {
            Ok(state) => state.clone(),
            Err(_) => return Err(Arc::new(GatewayError::Cancelled)),
        };
        match state {
            PromiseState::Failed(error) => Err(error),
            _ => Ok(()),
        }
    }
}
