//! Generic pub/sub event bus over a Tokio broadcast channel.
//!
//! Both the swarm event stream and the audit event stream (§6) are
//! instances of this bus, parameterised over their own event type.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Channel capacity for broadcast. Slow subscribers that fall this far
/// behind will observe a `Lagged` error on their next `recv`.
const CHANNEL_CAPACITY: usize = 1024;

/// Shared reference to an [`EventBus`].
pub type SharedEventBus<T> = Arc<EventBus<T>>;

/// A typed broadcast bus. Publishing never blocks on subscribers and
/// never fails because there are none.
pub struct EventBus<T: Clone + Send + Sync + 'static> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + Sync + 'static> EventBus<T> {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared(self) -> SharedEventBus<T> {
        Arc::new(self)
    }

    /// Publish an event to all current subscribers. A `0` receiver count
    /// is not an error — it just means nobody is currently listening.
    pub fn publish(&self, event: T) -> usize {
        match self.sender.send(event) {
            Ok(count) => {
                debug!(receivers = count, "event published");
                count
            }
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A predicate-based filter over a subscription, looping `recv` until a
/// matching event arrives.
pub struct FilteredReceiver<T: Clone + Send + Sync + 'static> {
    receiver: broadcast::Receiver<T>,
    predicate: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Clone + Send + Sync + 'static> FilteredReceiver<T> {
    pub fn new(
        receiver: broadcast::Receiver<T>,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver,
            predicate: Box::new(predicate),
        }
    }

    pub async fn recv(&mut self) -> Result<T, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if (self.predicate)(&event) {
                return Ok(event);
            }
        }
    }
}

pub trait EventBusExt<T: Clone + Send + Sync + 'static> {
    fn subscribe_filtered(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> FilteredReceiver<T>;
}

impl<T: Clone + Send + Sync + 'static> EventBusExt<T> for EventBus<T> {
    fn subscribe_filtered(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> FilteredReceiver<T> {
        FilteredReceiver::new(self.subscribe(), predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let bus: EventBus<u32> = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(42);
        assert_eq!(rx.recv().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus: EventBus<u32> = EventBus::new();
        assert_eq!(bus.publish(1), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus: EventBus<&'static str> = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        bus.publish("hello");
        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn filtered_receiver_skips_non_matching() {
        let bus: EventBus<i32> = EventBus::new();
        let mut filtered = bus.subscribe_filtered(|v: &i32| *v > 10);
        bus.publish(1);
        bus.publish(2);
        bus.publish(99);
        assert_eq!(filtered.recv().await.unwrap(), 99);
    }
}
