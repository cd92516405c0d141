//! Handle to a running reconciler.

use crate::actor::ReconcilerCmd;
use crate::error::ReconcilerError;
use crate::view::{Entity, MergedView, TempId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

/// State of the live change subscription behind a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelStatus {
    Connecting,
    Connected,
    /// Live updates stopped. The view keeps its last state; call
    /// [`ReconcilerHandle::resync`] with a fresh snapshot to recover.
    Closed { reason: String },
}

impl ChannelStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Cloneable handle to a reconciler actor.
///
/// Reads go through watch channels and never block the actor. Writes are queued
/// and applied in order. The actor stops when [`close`](Self::close) is called or
/// the last clone is dropped.
pub struct ReconcilerHandle<T: Entity> {
    tx: mpsc::Sender<ReconcilerCmd<T>>,
    view_rx: watch::Receiver<MergedView<T>>,
    status_rx: watch::Receiver<ChannelStatus>,
    shutdown_token: CancellationToken,
    _guard: Arc<DropGuard>,
}

impl<T: Entity> Clone for ReconcilerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            view_rx: self.view_rx.clone(),
            status_rx: self.status_rx.clone(),
            shutdown_token: self.shutdown_token.clone(),
            _guard: self._guard.clone(),
        }
    }
}

impl<T: Entity> std::fmt::Debug for ReconcilerHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcilerHandle")
            .field("status", &*self.status_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl<T: Entity> ReconcilerHandle<T> {
    pub(crate) fn new(
        tx: mpsc::Sender<ReconcilerCmd<T>>,
        view_rx: watch::Receiver<MergedView<T>>,
        status_rx: watch::Receiver<ChannelStatus>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let guard = Arc::new(shutdown_token.clone().drop_guard());
        Self {
            tx,
            view_rx,
            status_rx,
            shutdown_token,
            _guard: guard,
        }
    }

    /// Show a local entity immediately; returns the id to settle it with later.
    pub async fn add_pending(&self, payload: T::Draft) -> Result<TempId, ReconcilerError> {
        let temp_id = TempId::new();
        self.send(ReconcilerCmd::AddPending { temp_id, payload })
            .await?;
        Ok(temp_id)
    }

    /// Record the server id the write was accepted under.
    pub async fn assign_server_id(&self, temp_id: TempId, id: T::Id) -> Result<(), ReconcilerError> {
        self.send(ReconcilerCmd::AssignServerId { temp_id, id }).await
    }

    /// Drop a pending entry whose write failed.
    pub async fn reject_pending(&self, temp_id: TempId) -> Result<(), ReconcilerError> {
        self.send(ReconcilerCmd::RejectPending { temp_id }).await
    }

    /// Reopen the live stream if it closed. Hosts fetch their snapshot once the
    /// status is `Connected` again and pass it to [`resync`](Self::resync), so
    /// nothing committed in between is missed.
    pub async fn reconnect(&self) -> Result<(), ReconcilerError> {
        let (resp, rx) = oneshot::channel();
        self.send(ReconcilerCmd::Reconnect { resp }).await?;
        rx.await.map_err(|_| ReconcilerError::Closed)
    }

    /// Replace confirmed state with `snapshot`, reconnecting first if the channel
    /// closed. Resolves once the snapshot is applied.
    pub async fn resync(&self, snapshot: Vec<T>) -> Result<(), ReconcilerError> {
        let (resp, rx) = oneshot::channel();
        self.send(ReconcilerCmd::Resync { snapshot, resp }).await?;
        rx.await.map_err(|_| ReconcilerError::Closed)
    }

    /// Current merged view.
    pub fn view(&self) -> MergedView<T> {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<MergedView<T>> {
        self.view_rx.clone()
    }

    pub fn status(&self) -> ChannelStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Request shutdown without waiting.
    pub fn shutdown(&self) {
        let _ = self.tx.try_send(ReconcilerCmd::Shutdown);
        self.shutdown_token.cancel();
    }

    /// Shut the actor down and wait until it has released its subscription.
    pub async fn close(&self) {
        self.shutdown();
        self.tx.closed().await;
    }

    async fn send(&self, cmd: ReconcilerCmd<T>) -> Result<(), ReconcilerError> {
        self.tx.send(cmd).await.map_err(|_| ReconcilerError::Closed)
    }
}
