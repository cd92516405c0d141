//! Parent entity repository trait.

use crate::error::MetadataResult;
use async_trait::async_trait;
use atelier_core::{AssetRecord, EntityId, ParentEntity};

#[async_trait]
pub trait EntityRepo: Send + Sync {
    async fn create_entity(&self, entity: &ParentEntity) -> MetadataResult<()>;

    async fn get_entity(&self, entity_id: &EntityId) -> MetadataResult<Option<ParentEntity>>;

    /// Delete the entity and every attached asset in one transaction.
    ///
    /// Returns the removed asset records, or `None` if the entity did not exist.
    async fn delete_entity_cascade(
        &self,
        entity_id: &EntityId,
    ) -> MetadataResult<Option<Vec<AssetRecord>>>;
}
