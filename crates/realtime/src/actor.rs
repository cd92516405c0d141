//! Reconciler actor: the single writer of a merged view.
//!
//! Local commands and remote events are applied strictly in the order the actor's
//! `select!` loop observes them. Nothing else mutates the view.

use crate::error::FeedError;
use crate::handle::{ChannelStatus, ReconcilerHandle};
use crate::source::{ChangeSource, ChangeStream};
use crate::view::{Action, Entity, MergedView, TempId};
use atelier_core::ChangeEvent;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const COMMAND_BUFFER: usize = 64;

/// Commands sent from handles to the actor.
pub(crate) enum ReconcilerCmd<T: Entity> {
    AddPending {
        temp_id: TempId,
        payload: T::Draft,
    },
    AssignServerId {
        temp_id: TempId,
        id: T::Id,
    },
    RejectPending {
        temp_id: TempId,
    },
    /// Resubscribe if the channel is closed, without touching the view.
    Reconnect {
        resp: oneshot::Sender<()>,
    },
    /// Apply a fresh snapshot; reconnect first if the channel is closed.
    Resync {
        snapshot: Vec<T>,
        resp: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Spawns reconciler actors.
pub struct Reconciler;

impl Reconciler {
    /// Start reconciling `topic` from `source` on top of `snapshot`.
    ///
    /// Must be called within a tokio runtime. The actor runs until the handle is
    /// closed or its last clone is dropped.
    pub fn spawn<T, S>(source: S, topic: impl Into<String>, snapshot: Vec<T>) -> ReconcilerHandle<T>
    where
        T: Entity,
        S: ChangeSource<T>,
    {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let view = MergedView::from_snapshot(snapshot);
        let (view_tx, view_rx) = watch::channel(view.clone());
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Connecting);
        let shutdown_token = CancellationToken::new();

        let actor = ReconcilerActor {
            source: Arc::new(source),
            topic: topic.into(),
            view,
            stream: None,
            rx,
            view_tx,
            status_tx,
        };
        tokio::spawn(actor.run(shutdown_token.clone()));

        ReconcilerHandle::new(tx, view_rx, status_rx, shutdown_token)
    }
}

struct ReconcilerActor<T: Entity, S> {
    source: Arc<S>,
    topic: String,
    view: MergedView<T>,
    stream: Option<ChangeStream<T>>,
    rx: mpsc::Receiver<ReconcilerCmd<T>>,
    view_tx: watch::Sender<MergedView<T>>,
    status_tx: watch::Sender<ChannelStatus>,
}

impl<T: Entity, S: ChangeSource<T>> ReconcilerActor<T, S> {
    async fn run(mut self, shutdown_token: CancellationToken) {
        tokio::select! {
            _ = shutdown_token.cancelled() => {}
            _ = self.connect() => {}
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown_token.cancelled() => break,

                cmd = self.rx.recv() => match cmd {
                    Some(ReconcilerCmd::Shutdown) | None => break,
                    Some(ReconcilerCmd::Reconnect { resp }) => {
                        if self.stream.is_none() {
                            tokio::select! {
                                _ = shutdown_token.cancelled() => break,
                                _ = self.connect() => {}
                            }
                        }
                        let _ = resp.send(());
                    }
                    Some(ReconcilerCmd::Resync { snapshot, resp }) => {
                        if self.stream.is_none() {
                            tokio::select! {
                                _ = shutdown_token.cancelled() => break,
                                _ = self.connect() => {}
                            }
                        }
                        self.apply(Action::Snapshot(snapshot));
                        let _ = resp.send(());
                    }
                    Some(cmd) => self.handle_command(cmd),
                },

                event = next_event(&mut self.stream) => match event {
                    Some(Ok(event)) => self.apply_remote(event),
                    Some(Err(err)) => self.disconnect(err.to_string()),
                    None => self.disconnect(FeedError::Closed.to_string()),
                },
            }
        }

        // Dropping the stream releases the subscription.
        self.stream = None;
        self.status_tx.send_replace(ChannelStatus::Closed {
            reason: "reconciler closed".to_string(),
        });
        debug!(topic = %self.topic, "reconciler stopped");
    }

    async fn connect(&mut self) {
        self.status_tx.send_replace(ChannelStatus::Connecting);
        match self.source.subscribe(&self.topic).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.status_tx.send_replace(ChannelStatus::Connected);
                debug!(topic = %self.topic, "reconciler connected");
            }
            Err(err) => self.disconnect(err.to_string()),
        }
    }

    /// Stop live updates but keep the merged state; the host must resync.
    fn disconnect(&mut self, reason: String) {
        warn!(topic = %self.topic, reason = %reason, "change stream closed, view is stale until resync");
        self.stream = None;
        self.status_tx
            .send_replace(ChannelStatus::Closed { reason });
    }

    fn handle_command(&mut self, cmd: ReconcilerCmd<T>) {
        match cmd {
            ReconcilerCmd::AddPending { temp_id, payload } => {
                self.apply(Action::AddPending { temp_id, payload })
            }
            ReconcilerCmd::AssignServerId { temp_id, id } => {
                self.apply(Action::AssignServerId { temp_id, id })
            }
            ReconcilerCmd::RejectPending { temp_id } => {
                self.apply(Action::RejectPending { temp_id })
            }
            // Handled in the select loop.
            ReconcilerCmd::Reconnect { .. }
            | ReconcilerCmd::Resync { .. }
            | ReconcilerCmd::Shutdown => {}
        }
    }

    fn apply_remote(&mut self, event: ChangeEvent<T>) {
        debug!(topic = %self.topic, kind = event.kind.as_str(), id = ?event.entity.id(), "remote change");
        self.apply(Action::Remote(event));
    }

    fn apply(&mut self, action: Action<T>) {
        let view = std::mem::take(&mut self.view).reduce(action);
        self.view_tx.send_replace(view.clone());
        self.view = view;
    }
}

async fn next_event<T>(
    stream: &mut Option<ChangeStream<T>>,
) -> Option<Result<ChangeEvent<T>, FeedError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
