//! Asset record repository trait.

use crate::error::MetadataResult;
use crate::models::{AttachOutcome, ConfirmOutcome};
use async_trait::async_trait;
use atelier_core::{AssetId, AssetRecord, EntityId, Subject};
use time::OffsetDateTime;

/// Repository for asset records.
///
/// Every state transition is a single conditional statement; callers inspect the
/// outcome instead of reading first and writing second.
#[async_trait]
pub trait AssetRepo: Send + Sync {
    /// Insert a freshly reserved record.
    async fn insert_asset(&self, record: &AssetRecord) -> MetadataResult<()>;

    async fn get_asset(&self, asset_id: AssetId) -> MetadataResult<Option<AssetRecord>>;

    /// Flip `Reserved` to `Confirmed` if `owner` owns the record.
    async fn confirm_asset(
        &self,
        asset_id: AssetId,
        owner: &Subject,
        confirmed_at: OffsetDateTime,
    ) -> MetadataResult<ConfirmOutcome>;

    /// Attach the record to `entity` unless it is attached elsewhere.
    async fn attach_asset(
        &self,
        asset_id: AssetId,
        owner: &Subject,
        entity: &EntityId,
    ) -> MetadataResult<AttachOutcome>;

    /// Remove the record. Returns it only if this call removed it.
    async fn delete_asset(&self, asset_id: AssetId) -> MetadataResult<Option<AssetRecord>>;

    /// Unconfirmed records created before `created_before`, oldest first.
    async fn list_orphans(
        &self,
        created_before: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<AssetRecord>>;

    /// Remove the record only while it is still unconfirmed.
    async fn delete_orphan(&self, asset_id: AssetId) -> MetadataResult<Option<AssetRecord>>;

    /// All records attached to `entity`, in creation order.
    async fn list_assets_for_entity(&self, entity: &EntityId) -> MetadataResult<Vec<AssetRecord>>;

    /// Whether any record references `object_key`.
    async fn object_key_exists(&self, object_key: &str) -> MetadataResult<bool>;
}
