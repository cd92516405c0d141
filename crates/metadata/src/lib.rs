//! Metadata store abstraction and implementations for atelier.
//!
//! This crate owns the relational source of truth:
//! - Asset records and their reserve/confirm/attach transitions
//! - Parent entities and cascading deletes
//! - Orphan listing for reclamation
//!
//! Every committed asset mutation is published to a [`ChangeFeed`] scoped by
//! the record's topic.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{AttachOutcome, ConfirmOutcome};
pub use repos::{AssetRepo, EntityRepo};
pub use store::{MetadataStore, SqliteStore};

use atelier_core::AssetRecord;
use atelier_core::config::MetadataConfig;
use atelier_realtime::ChangeFeed;
use std::sync::Arc;

/// Create a metadata store from configuration, publishing changes to `feed`.
pub async fn from_config(
    config: &MetadataConfig,
    feed: ChangeFeed<AssetRecord>,
) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs, feed).await?;
            tracing::info!(path = %path.display(), "opened sqlite metadata store");
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
