//! The change source seam consumed by the reconciler.

use crate::error::FeedError;
use async_trait::async_trait;
use atelier_core::ChangeEvent;
use futures::Stream;
use std::pin::Pin;

/// A live stream of change events for one topic.
///
/// An `Err` item means the stream can no longer be trusted to be gap-free; the
/// consumer should stop reading and resync from an authoritative snapshot.
pub type ChangeStream<T> = Pin<Box<dyn Stream<Item = Result<ChangeEvent<T>, FeedError>> + Send>>;

/// Anything that can deliver change events for a topic.
#[async_trait]
pub trait ChangeSource<T>: Send + Sync + 'static {
    /// Open a subscription. Dropping the returned stream releases it.
    async fn subscribe(&self, topic: &str) -> Result<ChangeStream<T>, FeedError>;
}

#[async_trait]
impl<T, S> ChangeSource<T> for std::sync::Arc<S>
where
    S: ChangeSource<T> + ?Sized,
{
    async fn subscribe(&self, topic: &str) -> Result<ChangeStream<T>, FeedError> {
        (**self).subscribe(topic).await
    }
}
