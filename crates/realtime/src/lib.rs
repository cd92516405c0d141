//! Atelier realtime: change feeds and optimistic-state reconciliation.
//!
//! - [`ChangeFeed`] fans change events out to per-topic subscribers in process.
//! - [`HttpChangeSource`] consumes the same events from a remote server.
//! - [`MergedView`] is the pure reducer merging confirmed state with local
//!   pending edits; [`Reconciler`] runs it behind a single-writer actor.

pub mod actor;
pub mod asset;
pub mod error;
pub mod feed;
pub mod handle;
pub mod http;
pub mod source;
pub mod view;

pub use actor::Reconciler;
pub use asset::AssetDraft;
pub use error::{FeedError, ReconcilerError};
pub use feed::{ChangeFeed, DEFAULT_FEED_CAPACITY, FeedSubscription};
pub use handle::{ChannelStatus, ReconcilerHandle};
pub use http::HttpChangeSource;
pub use source::{ChangeSource, ChangeStream};
pub use view::{Action, Entity, Entry, MergedView, TempId};
