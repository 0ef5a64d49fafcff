//! Tokio channel-based transport for single-process mode
//!
//! Uses broadcast channels for pub/sub semantics within a single process.
//! No serialization overhead - messages are passed directly.

use crate::error::TransportError;
use crate::transport::{Publisher, Subscriber};
use async_trait::async_trait;
use log::warn;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::broadcast;

/// Channel-based publisher using broadcast
///
/// Cloning shares the underlying channel. Publishing with no live
/// subscriber drops the message.
#[derive(Clone)]
pub struct ChannelPublisher<M> {
    tx: broadcast::Sender<M>,
}

impl<M: Clone> ChannelPublisher<M> {
    /// Create a publisher with no subscriber yet
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a publisher/subscriber pair with given capacity
    pub fn pair(capacity: usize) -> (Self, ChannelSubscriber<M>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, ChannelSubscriber { rx })
    }

    /// Get another subscriber for this publisher
    pub fn subscribe(&self) -> ChannelSubscriber<M> {
        ChannelSubscriber {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl<M> Publisher<M> for ChannelPublisher<M>
where
    M: Serialize + Clone + Send + Sync + 'static,
{
    async fn publish(&self, msg: &M) -> Result<(), TransportError> {
        // An error here only means nobody is listening
        let _ = self.tx.send(msg.clone());
        Ok(())
    }
}

/// Channel-based subscriber using broadcast receiver
pub struct ChannelSubscriber<M> {
    rx: broadcast::Receiver<M>,
}

#[async_trait]
impl<M> Subscriber<M> for ChannelSubscriber<M>
where
    M: DeserializeOwned + Clone + Send + 'static,
{
    async fn next(&mut self) -> Result<M, TransportError> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Ok(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[TRANSPORT] Subscriber lagged, skipped {} messages", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TransportError::ChannelClosed);
                }
            }
        }
    }

    fn try_next(&mut self) -> Result<Option<M>, TransportError> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => return Ok(Some(msg)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(TransportError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pubsub() {
        let (publisher, mut subscriber) = ChannelPublisher::<String>::pair(10);

        publisher.publish(&"hello".to_string()).await.unwrap();

        let msg = subscriber.next().await.unwrap();
        assert_eq!(msg, "hello");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let (publisher, mut sub1) = ChannelPublisher::<i32>::pair(10);
        let mut sub2 = publisher.subscribe();

        publisher.publish(&42).await.unwrap();

        assert_eq!(sub1.next().await.unwrap(), 42);
        assert_eq!(sub2.next().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let publisher = ChannelPublisher::<i32>::new(4);
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(&1).await.unwrap();

        let mut late = publisher.subscribe();
        assert_eq!(late.try_next().unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_after_publisher_dropped() {
        let (publisher, mut subscriber) = ChannelPublisher::<i32>::pair(4);
        drop(publisher);
        assert!(matches!(
            subscriber.next().await,
            Err(TransportError::ChannelClosed)
        ));
    }
}
