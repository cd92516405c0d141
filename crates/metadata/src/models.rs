//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use atelier_core::{AssetId, AssetRecord, EntityId, ParentEntity, Subject};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Assets
// =============================================================================

/// Asset record as stored in the `assets` table.
#[derive(Debug, Clone, FromRow)]
pub struct AssetRow {
    pub asset_id: Uuid,
    pub owner_id: String,
    pub parent_entity_id: Option<String>,
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub confirmed: bool,
    pub created_at: OffsetDateTime,
    pub confirmed_at: Option<OffsetDateTime>,
}

impl AssetRow {
    pub fn from_record(record: &AssetRecord) -> MetadataResult<Self> {
        let size_bytes = i64::try_from(record.size_bytes).map_err(|_| {
            MetadataError::Constraint(format!("size_bytes {} out of range", record.size_bytes))
        })?;
        Ok(Self {
            asset_id: *record.id.as_uuid(),
            owner_id: record.owner_id.as_str().to_string(),
            parent_entity_id: record
                .parent_entity_id
                .as_ref()
                .map(|e| e.as_str().to_string()),
            object_key: record.object_key.clone(),
            filename: record.filename.clone(),
            content_type: record.content_type.clone(),
            size_bytes,
            confirmed: record.confirmed,
            created_at: record.created_at,
            confirmed_at: record.confirmed_at,
        })
    }

    pub fn into_record(self) -> MetadataResult<AssetRecord> {
        let owner_id = Subject::parse(&self.owner_id)
            .map_err(|e| MetadataError::Corrupt(format!("asset {}: {e}", self.asset_id)))?;
        let parent_entity_id = self
            .parent_entity_id
            .as_deref()
            .map(EntityId::parse)
            .transpose()
            .map_err(|e| MetadataError::Corrupt(format!("asset {}: {e}", self.asset_id)))?;
        let size_bytes = u64::try_from(self.size_bytes).map_err(|_| {
            MetadataError::Corrupt(format!(
                "asset {}: negative size {}",
                self.asset_id, self.size_bytes
            ))
        })?;

        Ok(AssetRecord {
            id: AssetId::from(self.asset_id),
            owner_id,
            parent_entity_id,
            object_key: self.object_key,
            filename: self.filename,
            content_type: self.content_type,
            size_bytes,
            confirmed: self.confirmed,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
        })
    }
}

pub(crate) fn into_records(rows: Vec<AssetRow>) -> MetadataResult<Vec<AssetRecord>> {
    rows.into_iter().map(AssetRow::into_record).collect()
}

// =============================================================================
// Parent entities
// =============================================================================

/// Parent entity as stored in the `entities` table.
#[derive(Debug, Clone, FromRow)]
pub struct EntityRow {
    pub entity_id: String,
    pub owner_id: String,
    pub created_at: OffsetDateTime,
}

impl EntityRow {
    pub fn into_entity(self) -> MetadataResult<ParentEntity> {
        let id = EntityId::parse(&self.entity_id)
            .map_err(|e| MetadataError::Corrupt(format!("entity {}: {e}", self.entity_id)))?;
        let owner_id = Subject::parse(&self.owner_id)
            .map_err(|e| MetadataError::Corrupt(format!("entity {}: {e}", self.entity_id)))?;
        Ok(ParentEntity {
            id,
            owner_id,
            created_at: self.created_at,
        })
    }
}

// =============================================================================
// Conditional update outcomes
// =============================================================================

/// Result of the conditional confirm update.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    /// This call flipped the record to confirmed.
    Confirmed(AssetRecord),
    /// The record was already confirmed by the same owner.
    AlreadyConfirmed(AssetRecord),
    /// The record exists but belongs to someone else.
    OwnerMismatch,
    Missing,
}

/// Result of the conditional attach update.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachOutcome {
    /// The record moved from unattached to `entity`.
    Attached(AssetRecord),
    /// Already attached to the requested entity.
    Unchanged(AssetRecord),
    /// Attached to a different entity.
    Conflict { current: EntityId },
    OwnerMismatch,
    Missing,
}
