//! Server-sent event feed of asset changes for one parent entity.

use crate::auth::require_identity;
use crate::error::ApiResult;
use crate::metrics::FEED_SUBSCRIBERS;
use crate::state::AppState;
use atelier_core::asset::entity_topic;
use atelier_realtime::FeedError;
use atelier_realtime::http::{CHANGE_EVENT, LAGGED_EVENT};
use axum::extract::{Path, Request, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Tracks one open feed connection in the subscriber gauge.
struct SubscriberGuard;

impl SubscriberGuard {
    fn new() -> Self {
        FEED_SUBSCRIBERS.inc();
        Self
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        FEED_SUBSCRIBERS.dec();
    }
}

/// GET /v1/entities/{entity_id}/assets/feed
///
/// Streams `change` events carrying `{kind, entity}` for every committed
/// mutation of an asset attached to the entity. A subscriber that falls behind
/// receives one `lagged` event with the number of skipped events and the
/// stream ends; the client is expected to refetch the snapshot and resubscribe.
pub async fn entity_feed(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    req: Request,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    require_identity(&req)?;
    let entity = state.coordinator.entity(&entity_id).await?;
    let topic = entity_topic(&entity.id);

    let subscription = state.metadata.change_feed().subscribe_stream(&topic);
    debug!(topic = %topic, "Feed subscriber connected");

    let events = stream::unfold(
        Some((subscription, SubscriberGuard::new())),
        |open| async move {
            let (mut subscription, guard) = open?;
            match subscription.next().await? {
                Ok(change) => {
                    let event = Event::default()
                        .event(CHANGE_EVENT)
                        .json_data(&change)
                        .unwrap_or_else(|e| {
                            warn!(error = %e, "Failed to encode change event");
                            Event::default().comment("encode error")
                        });
                    Some((Ok::<_, Infallible>(event), Some((subscription, guard))))
                }
                Err(FeedError::Lagged(skipped)) => {
                    let event = Event::default()
                        .event(LAGGED_EVENT)
                        .data(skipped.to_string());
                    Some((Ok::<_, Infallible>(event), None))
                }
                Err(e) => {
                    warn!(error = %e, "Change feed ended");
                    None
                }
            }
        },
    );

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
