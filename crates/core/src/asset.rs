//! Asset records and their reserve/confirm lifecycle.

use crate::subject::Subject;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an uploaded asset.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
    /// Generate a new random asset ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid asset ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AssetId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a parent entity (an issue, a course step, ...) that assets attach to.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Maximum accepted length for an entity identifier.
    pub const MAX_LEN: usize = 128;

    /// Parse and validate an entity identifier.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidId("entity ID cannot be empty".to_string()));
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(crate::Error::InvalidId(format!(
                "entity ID exceeds {} characters",
                Self::MAX_LEN
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
        {
            return Err(crate::Error::InvalidId(format!(
                "entity ID contains unsupported characters: {trimmed}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of an asset.
///
/// Deletion is the absence of a record, so there is no `Deleted` variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    /// Record exists, the binary transfer has not been confirmed.
    Reserved,
    /// The owner confirmed the transfer.
    Confirmed,
}

impl AssetState {
    pub fn from_confirmed(confirmed: bool) -> Self {
        if confirmed {
            Self::Confirmed
        } else {
            Self::Reserved
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// One binary asset tracked across the metadata store and the content store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub owner_id: Subject,
    /// Parent entity, absent while the asset is staged ahead of its parent.
    pub parent_entity_id: Option<EntityId>,
    /// Content store locator.
    pub object_key: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub confirmed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub confirmed_at: Option<OffsetDateTime>,
}

impl AssetRecord {
    pub fn state(&self) -> AssetState {
        AssetState::from_confirmed(self.confirmed)
    }

    /// Whether this unconfirmed record is older than the retention horizon.
    pub fn is_orphaned(&self, now: OffsetDateTime, retention: time::Duration) -> bool {
        !self.confirmed && self.created_at + retention < now
    }

    /// Change feed topic this record currently belongs to.
    pub fn topic(&self) -> String {
        match &self.parent_entity_id {
            Some(entity) => entity_topic(entity),
            None => owner_topic(&self.owner_id),
        }
    }
}

/// Change feed topic for assets attached to `entity`.
pub fn entity_topic(entity: &EntityId) -> String {
    format!("entity:{entity}")
}

/// Change feed topic for unattached assets staged by `owner`.
pub fn owner_topic(owner: &Subject) -> String {
    format!("owner:{owner}")
}

/// A parent entity that assets can be attached to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentEntity {
    pub id: EntityId,
    pub owner_id: Subject,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Request/response types
// =============================================================================

/// Request to reserve a new asset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReserveAssetRequest {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_entity_id: Option<String>,
}

/// Credential allowing one direct transfer into the content store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteGrant {
    pub method: String,
    pub url: String,
    /// Headers the transfer must carry (content type, for example).
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub max_size_bytes: u64,
}

/// Response to a reservation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReserveAssetResponse {
    pub asset_id: AssetId,
    pub object_key: String,
    pub write_grant: WriteGrant,
    pub record: AssetRecord,
}

/// Response to a confirmation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfirmAssetResponse {
    pub record: AssetRecord,
    /// True when the asset was already confirmed and nothing changed.
    pub replayed: bool,
}

/// Request to attach an asset to its parent entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachAssetRequest {
    pub parent_entity_id: String,
}

/// Response wrapping a single record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssetResponse {
    pub record: AssetRecord,
}

/// Response to a deletion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteAssetResponse {
    pub asset_id: AssetId,
    /// Whether the content-store object was removed as well.
    pub content_deleted: bool,
}

/// Request to register a parent entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterEntityRequest {
    pub entity_id: String,
}

/// Snapshot of the assets attached to an entity, in creation order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityAssetsResponse {
    pub entity_id: EntityId,
    pub assets: Vec<AssetRecord>,
}

/// Outcome of cascading a parent entity deletion.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CascadeDeleteResponse {
    pub assets_deleted: u64,
    pub content_delete_failures: u64,
}

/// Counters reported by one reclamation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimStats {
    pub orphans_found: u64,
    pub orphans_reclaimed: u64,
    pub stray_objects_deleted: u64,
    pub content_delete_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(confirmed: bool, created_at: OffsetDateTime) -> AssetRecord {
        AssetRecord {
            id: AssetId::new(),
            owner_id: Subject::parse("user-1").unwrap(),
            parent_entity_id: None,
            object_key: "assets/2026/01/abc/file.png".to_string(),
            filename: "file.png".to_string(),
            content_type: "image/png".to_string(),
            size_bytes: 10,
            confirmed,
            created_at,
            confirmed_at: None,
        }
    }

    #[test]
    fn test_asset_id_parse_roundtrip() {
        let id = AssetId::new();
        let parsed = AssetId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(AssetId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_entity_id_validation() {
        assert!(EntityId::parse("issue-42").is_ok());
        assert!(EntityId::parse("course:7.step_3").is_ok());
        assert!(EntityId::parse("  ").is_err());
        assert!(EntityId::parse("a/b").is_err());
        assert!(EntityId::parse(&"x".repeat(EntityId::MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&AssetState::Reserved).unwrap();
        assert_eq!(json, "\"reserved\"");
        assert!(AssetState::Confirmed.is_confirmed());
    }

    #[test]
    fn test_orphan_detection_requires_unconfirmed_and_old() {
        let now = OffsetDateTime::now_utc();
        let retention = time::Duration::hours(1);

        assert!(record(false, now - time::Duration::hours(2)).is_orphaned(now, retention));
        assert!(!record(false, now - time::Duration::minutes(5)).is_orphaned(now, retention));
        assert!(!record(true, now - time::Duration::hours(2)).is_orphaned(now, retention));
    }

    #[test]
    fn test_topic_follows_parent() {
        let now = OffsetDateTime::now_utc();
        let mut rec = record(true, now);
        assert_eq!(rec.topic(), "owner:user-1");
        rec.parent_entity_id = Some(EntityId::parse("issue-9").unwrap());
        assert_eq!(rec.topic(), "entity:issue-9");
    }
}
