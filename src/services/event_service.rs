use crate::models::events::PaymentEvent;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, PoisonError, RwLock},
    task::{Context, Poll},
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event delivery failed: {0}")]
    Delivery(String),
}

/// Downstream notification of committed payment outcomes (enrollment, SSE, ...)
#[async_trait]
pub trait PaymentEventPublisher: Send + Sync {
    async fn publish(&self, event: PaymentEvent) -> Result<(), PublishError>;
}

/// Per-user channels. The lock is never held across an await.
struct UserChannels {
    senders: RwLock<HashMap<Uuid, broadcast::Sender<PaymentEvent>>>,
    capacity: usize,
}

impl UserChannels {
    fn register(&self, user_id: Uuid) -> broadcast::Receiver<PaymentEvent> {
        let mut senders = self.senders.write().unwrap_or_else(PoisonError::into_inner);
        senders
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    fn prune(&self, user_id: Uuid) {
        let mut senders = self.senders.write().unwrap_or_else(PoisonError::into_inner);
        if senders
            .get(&user_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            senders.remove(&user_id);
            debug!("Pruned idle event channel of user {}", user_id);
        }
    }

    /// None when the user has no channel, Some(false) when every receiver is gone
    fn send(&self, user_id: Uuid, event: PaymentEvent) -> Option<bool> {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        senders
            .get(&user_id)
            .map(|sender| sender.send(event).is_ok())
    }

    fn receiver_count(&self, user_id: Uuid) -> usize {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A user's live event feed. Dropping it unregisters the user's channel once
/// no other subscription of that user is left. Lagged events are skipped.
pub struct EventSubscription {
    user_id: Uuid,
    stream: Option<BroadcastStream<PaymentEvent>>,
    channels: Arc<UserChannels>,
}

impl Stream for EventSubscription {
    type Item = PaymentEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(stream) = this.stream.as_mut() else {
            return Poll::Ready(None);
        };

        loop {
            match stream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    debug!(
                        "Event stream of user {} lagged, skipped {} events",
                        this.user_id, skipped
                    );
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        // The receiver has to go first so the channel counts as idle
        self.stream.take();
        self.channels.prune(self.user_id);
    }
}

/// In-process event hub.
///
/// One broadcast channel carries every event to downstream consumers; a
/// per-user registry of channels feeds SSE streams. Only the hub mutates the
/// registry: `subscribe` registers, dropping the subscription or `unsubscribe`
/// removes idle channels.
pub struct EventHub {
    all: broadcast::Sender<PaymentEvent>,
    users: Arc<UserChannels>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            all: broadcast::channel(capacity).0,
            users: Arc::new(UserChannels {
                senders: RwLock::new(HashMap::new()),
                capacity,
            }),
        }
    }

    /// Every event, for downstream collaborators such as enrollment granting
    pub fn subscribe_all(&self) -> broadcast::Receiver<PaymentEvent> {
        self.all.subscribe()
    }

    /// Events of a single user
    pub fn subscribe(&self, user_id: Uuid) -> EventSubscription {
        let receiver = self.users.register(user_id);
        EventSubscription {
            user_id,
            stream: Some(BroadcastStream::new(receiver)),
            channels: self.users.clone(),
        }
    }

    /// Drop the user's channel once nobody listens to it anymore
    pub fn unsubscribe(&self, user_id: Uuid) {
        self.users.prune(user_id);
    }

    pub fn user_subscriber_count(&self, user_id: Uuid) -> usize {
        self.users.receiver_count(user_id)
    }

    pub fn registered_users(&self) -> usize {
        self.users.len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentEventPublisher for EventHub {
    async fn publish(&self, event: PaymentEvent) -> Result<(), PublishError> {
        let user_id = event.user_id();

        // Nobody listening on the firehose is fine; events are fire-and-forget
        let _ = self.all.send(event.clone());

        if self.users.send(user_id, event) == Some(false) {
            self.unsubscribe(user_id);
        }

        Ok(())
    }
}
