//! In-process, topic-keyed change fan-out.
//!
//! Each topic owns a `broadcast` channel created on first subscription. When the
//! last subscriber of a topic goes away the channel is removed, so idle topics cost
//! nothing.

use crate::error::FeedError;
use crate::source::{ChangeSource, ChangeStream};
use async_trait::async_trait;
use atelier_core::ChangeEvent;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Default per-topic buffer.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

struct FeedInner<T> {
    topics: DashMap<String, broadcast::Sender<ChangeEvent<T>>>,
    capacity: usize,
}

impl<T> FeedInner<T> {
    fn prune(&self, topic: &str) {
        self.topics
            .remove_if(topic, |_, tx| tx.receiver_count() == 0);
    }
}

/// Topic-keyed broadcast hub for change events.
pub struct ChangeFeed<T> {
    inner: Arc<FeedInner<T>>,
}

impl<T> Clone for ChangeFeed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ChangeFeed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("topics", &self.inner.topics.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for ChangeFeed<T> {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl<T: Clone + Send + 'static> ChangeFeed<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                topics: DashMap::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Deliver `event` to current subscribers of `topic`.
    ///
    /// Returns the number of receivers reached; zero if nobody is listening.
    pub fn publish(&self, topic: &str, event: ChangeEvent<T>) -> usize {
        let delivered = match self.inner.topics.get(topic) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => return 0,
        };
        if delivered == 0 {
            self.inner.prune(topic);
        }
        delivered
    }

    /// Subscribe to `topic`, creating its channel if needed.
    pub fn subscribe_stream(&self, topic: &str) -> FeedSubscription<T> {
        let rx = self
            .inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe();

        FeedSubscription {
            stream: Some(BroadcastStream::new(rx)),
            topic: topic.to_string(),
            feed: self.inner.clone(),
        }
    }

    /// Number of topics with at least one live channel.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.len()
    }

    /// Total receivers across all topics.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .topics
            .iter()
            .map(|entry| entry.value().receiver_count())
            .sum()
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> ChangeSource<T> for ChangeFeed<T> {
    async fn subscribe(&self, topic: &str) -> Result<ChangeStream<T>, FeedError> {
        Ok(Box::pin(self.subscribe_stream(topic)))
    }
}

/// A live subscription to one topic. Dropping it releases the topic when it was
/// the last subscriber.
pub struct FeedSubscription<T> {
    stream: Option<BroadcastStream<ChangeEvent<T>>>,
    topic: String,
    feed: Arc<FeedInner<T>>,
}

impl<T: Clone + Send + 'static> Stream for FeedSubscription<T> {
    type Item = Result<ChangeEvent<T>, FeedError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(stream) = self.stream.as_mut() else {
            return Poll::Ready(None);
        };
        match stream.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(event))) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                Poll::Ready(Some(Err(FeedError::Lagged(skipped))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for FeedSubscription<T> {
    fn drop(&mut self) {
        // Release our receiver before checking whether anyone is left.
        self.stream.take();
        self.feed.prune(&self.topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::ChangeKind;

    #[tokio::test]
    async fn test_publish_reaches_topic_subscribers_only() {
        let feed = ChangeFeed::<u32>::new(8);
        let mut a = feed.subscribe_stream("entity:a");
        let mut b = feed.subscribe_stream("entity:b");

        assert_eq!(feed.publish("entity:a", ChangeEvent::insert(1)), 1);

        let event = a.next().await.unwrap().unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.entity, 1);

        feed.publish("entity:b", ChangeEvent::delete(2));
        assert_eq!(b.next().await.unwrap().unwrap().entity, 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let feed = ChangeFeed::<u32>::new(8);
        assert_eq!(feed.publish("entity:nobody", ChangeEvent::insert(1)), 0);
        assert_eq!(feed.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_last_subscriber_releases_topic() {
        let feed = ChangeFeed::<u32>::new(8);
        let first = feed.subscribe_stream("entity:a");
        let second = feed.subscribe_stream("entity:a");
        assert_eq!(feed.topic_count(), 1);
        assert_eq!(feed.subscriber_count(), 2);

        drop(first);
        assert_eq!(feed.topic_count(), 1);
        drop(second);
        assert_eq!(feed.topic_count(), 0);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_sees_lagged_error() {
        let feed = ChangeFeed::<u32>::new(2);
        let mut sub = feed.subscribe_stream("entity:a");

        for i in 0..5 {
            feed.publish("entity:a", ChangeEvent::insert(i));
        }

        match sub.next().await {
            Some(Err(FeedError::Lagged(skipped))) => assert_eq!(skipped, 3),
            other => panic!("expected lag, got {other:?}"),
        }
    }
}
