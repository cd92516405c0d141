//! Upload coordination across the metadata store and the content store.
//!
//! An asset moves `Reserved -> Confirmed` and leaves the system by having its
//! metadata record removed. The metadata record is the only existence signal:
//! content objects are written directly by clients through a write grant and
//! removed on a best-effort basis, so a failed content delete leaves a stray
//! object for the reclaimer rather than failing the caller.

use crate::metrics::{
    ASSETS_ATTACHED, ASSETS_CONFIRM_REPLAYED, ASSETS_CONFIRMED, ASSETS_DELETED, ASSETS_RESERVED,
    CONTENT_DELETE_FAILURES, record_upload_error,
};
use atelier_core::asset::{
    CascadeDeleteResponse, ConfirmAssetResponse, DeleteAssetResponse, ReserveAssetRequest,
    ReserveAssetResponse,
};
use atelier_core::config::UploadConfig;
use atelier_core::validation;
use atelier_core::{AssetId, AssetRecord, EntityId, ErrorKind, Identity, ParentEntity};
use atelier_metadata::{AttachOutcome, ConfirmOutcome, MetadataError, MetadataStore};
use atelier_storage::{GrantRequest, ObjectStore, StorageError};
use futures::StreamExt;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

/// Concurrent content deletes issued by a cascade.
const CASCADE_DELETE_CONCURRENCY: usize = 8;

/// Errors surfaced by the upload coordinator.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Declared size or content type rejected by policy.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Validation(#[from] atelier_core::Error),

    #[error("metadata store: {0}")]
    Metadata(#[from] MetadataError),

    #[error("content store: {0}")]
    Storage(#[from] StorageError),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::QuotaExceeded(_) | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Validation(e) => e.kind(),
            Self::Metadata(e) => e.kind(),
            Self::Storage(e) => e.kind(),
        }
    }
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;

fn observe<T>(result: UploadResult<T>) -> UploadResult<T> {
    if let Err(e) = &result {
        record_upload_error(e.kind());
    }
    result
}

/// Coordinates the reserve / transfer / confirm protocol and asset removal.
pub struct UploadCoordinator {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    config: UploadConfig,
}

impl UploadCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        config: UploadConfig,
    ) -> Self {
        Self {
            metadata,
            storage,
            config,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    // =========================================================================
    // Reserve
    // =========================================================================

    /// Validate the declared attributes, record the reservation and issue a
    /// write grant for its object key.
    #[instrument(
        skip(self, identity, request),
        fields(subject = %identity.subject, asset_id)
    )]
    pub async fn reserve(
        &self,
        identity: &Identity,
        request: ReserveAssetRequest,
    ) -> UploadResult<ReserveAssetResponse> {
        observe(self.reserve_inner(identity, request).await)
    }

    async fn reserve_inner(
        &self,
        identity: &Identity,
        request: ReserveAssetRequest,
    ) -> UploadResult<ReserveAssetResponse> {
        let filename = validation::validate_filename(&request.filename, self.config.max_filename_len)?;
        let content_type = validation::normalize_content_type(&request.content_type)?;
        if !validation::content_type_allowed(&content_type, &self.config.allowed_content_types) {
            return Err(UploadError::QuotaExceeded(format!(
                "content type {content_type} is not allowed"
            )));
        }
        if request.size_bytes == 0 {
            return Err(UploadError::InvalidInput(
                "declared size must be greater than zero".to_string(),
            ));
        }
        if request.size_bytes > self.config.max_size_bytes {
            return Err(UploadError::QuotaExceeded(format!(
                "declared size {} exceeds the {} byte limit",
                request.size_bytes, self.config.max_size_bytes
            )));
        }

        let parent_entity_id = match request.parent_entity_id.as_deref() {
            Some(raw) => {
                let entity_id = EntityId::parse(raw)?;
                self.authorize_entity(identity, &entity_id).await?;
                Some(entity_id)
            }
            None => None,
        };

        let now = OffsetDateTime::now_utc();
        let random: [u8; 16] = rand::random();
        let record = AssetRecord {
            id: AssetId::new(),
            owner_id: identity.subject.clone(),
            parent_entity_id,
            object_key: validation::build_object_key(now, &hex::encode(random), &filename),
            filename,
            content_type,
            size_bytes: request.size_bytes,
            confirmed: false,
            created_at: now,
            confirmed_at: None,
        };
        tracing::Span::current().record("asset_id", tracing::field::display(record.id));

        self.metadata.insert_asset(&record).await?;

        let grant_request = GrantRequest {
            key: record.object_key.clone(),
            content_type: record.content_type.clone(),
            max_size_bytes: record.size_bytes,
            ttl: self.config.credential_ttl(),
        };
        let write_grant = match self.storage.issue_write_grant(&grant_request).await {
            Ok(grant) => grant,
            Err(e) => {
                warn!(error = %e, "Write grant issuance failed, withdrawing reservation");
                if let Err(cleanup) = self.metadata.delete_asset(record.id).await {
                    warn!(error = %cleanup, "Failed to withdraw reservation; left for reclamation");
                }
                return Err(UploadError::Unavailable(format!(
                    "content store could not issue a write grant: {e}"
                )));
            }
        };

        ASSETS_RESERVED.inc();
        info!(
            object_key = %record.object_key,
            size_bytes = record.size_bytes,
            parent = ?record.parent_entity_id,
            "Asset reserved"
        );

        Ok(ReserveAssetResponse {
            asset_id: record.id,
            object_key: record.object_key.clone(),
            write_grant,
            record,
        })
    }

    // =========================================================================
    // Confirm
    // =========================================================================

    /// Mark the transfer complete. Confirming an already-confirmed asset is an
    /// idempotent success reported with `replayed = true`.
    #[instrument(skip(self, identity), fields(subject = %identity.subject, asset_id = %asset_id))]
    pub async fn confirm(
        &self,
        identity: &Identity,
        asset_id: AssetId,
    ) -> UploadResult<ConfirmAssetResponse> {
        observe(self.confirm_inner(identity, asset_id).await)
    }

    async fn confirm_inner(
        &self,
        identity: &Identity,
        asset_id: AssetId,
    ) -> UploadResult<ConfirmAssetResponse> {
        if self.config.verify_on_confirm {
            let record = self
                .metadata
                .get_asset(asset_id)
                .await?
                .ok_or_else(|| UploadError::NotFound(format!("asset {asset_id}")))?;
            if record.owner_id != identity.subject {
                return Err(UploadError::Conflict(
                    "asset belongs to another subject".to_string(),
                ));
            }
            if !record.confirmed {
                self.verify_transfer(&record).await?;
            }
        }

        let outcome = self
            .metadata
            .confirm_asset(asset_id, &identity.subject, OffsetDateTime::now_utc())
            .await?;

        match outcome {
            ConfirmOutcome::Confirmed(record) => {
                ASSETS_CONFIRMED.inc();
                info!("Asset confirmed");
                Ok(ConfirmAssetResponse {
                    record,
                    replayed: false,
                })
            }
            ConfirmOutcome::AlreadyConfirmed(record) => {
                ASSETS_CONFIRM_REPLAYED.inc();
                debug!("Asset already confirmed, replaying success");
                Ok(ConfirmAssetResponse {
                    record,
                    replayed: true,
                })
            }
            ConfirmOutcome::OwnerMismatch => Err(UploadError::Conflict(
                "asset belongs to another subject".to_string(),
            )),
            ConfirmOutcome::Missing => Err(UploadError::NotFound(format!("asset {asset_id}"))),
        }
    }

    async fn verify_transfer(&self, record: &AssetRecord) -> UploadResult<()> {
        match self.storage.head(&record.object_key).await {
            Ok(meta) if meta.size > record.size_bytes => Err(UploadError::InvalidInput(format!(
                "stored object is {} bytes, declared {}",
                meta.size, record.size_bytes
            ))),
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(UploadError::Conflict(
                "transfer not complete: object not found in content store".to_string(),
            )),
            Err(e) => Err(UploadError::Unavailable(format!(
                "content store unreachable: {e}"
            ))),
        }
    }

    // =========================================================================
    // Attach
    // =========================================================================

    /// Attach an asset staged without a parent to its parent entity.
    #[instrument(skip(self, identity), fields(subject = %identity.subject, asset_id = %asset_id))]
    pub async fn attach(
        &self,
        identity: &Identity,
        asset_id: AssetId,
        entity_id: &str,
    ) -> UploadResult<AssetRecord> {
        observe(self.attach_inner(identity, asset_id, entity_id).await)
    }

    async fn attach_inner(
        &self,
        identity: &Identity,
        asset_id: AssetId,
        entity_id: &str,
    ) -> UploadResult<AssetRecord> {
        let entity_id = EntityId::parse(entity_id)?;
        let record = self
            .metadata
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("asset {asset_id}")))?;
        if !identity.can_act_for(&record.owner_id) {
            return Err(UploadError::Forbidden(
                "only the uploader may attach an asset".to_string(),
            ));
        }
        self.authorize_entity(identity, &entity_id).await?;

        match self
            .metadata
            .attach_asset(asset_id, &record.owner_id, &entity_id)
            .await?
        {
            AttachOutcome::Attached(record) => {
                ASSETS_ATTACHED.inc();
                info!(entity_id = %entity_id, "Asset attached");
                Ok(record)
            }
            AttachOutcome::Unchanged(record) => Ok(record),
            AttachOutcome::Conflict { current } => Err(UploadError::Conflict(format!(
                "asset is already attached to {current}"
            ))),
            AttachOutcome::OwnerMismatch => Err(UploadError::Conflict(
                "asset ownership changed concurrently".to_string(),
            )),
            AttachOutcome::Missing => Err(UploadError::NotFound(format!("asset {asset_id}"))),
        }
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Fetch a record visible to the uploader, the parent owner or an elevated subject.
    pub async fn get(&self, identity: &Identity, asset_id: AssetId) -> UploadResult<AssetRecord> {
        let record = self
            .metadata
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("asset {asset_id}")))?;
        self.authorize_owner_or_parent(identity, &record).await?;
        Ok(record)
    }

    /// Look up a parent entity.
    pub async fn entity(&self, entity_id: &str) -> UploadResult<ParentEntity> {
        let entity_id = EntityId::parse(entity_id)?;
        self.metadata
            .get_entity(&entity_id)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("entity {entity_id}")))
    }

    /// All assets attached to an entity, in creation order.
    pub async fn entity_assets(&self, entity_id: &str) -> UploadResult<(EntityId, Vec<AssetRecord>)> {
        let entity = self.entity(entity_id).await?;
        let assets = self.metadata.list_assets_for_entity(&entity.id).await?;
        Ok((entity.id, assets))
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Remove an asset. The metadata record goes first; the content object is
    /// then deleted best-effort and a failure only shows in `content_deleted`.
    #[instrument(skip(self, identity), fields(subject = %identity.subject, asset_id = %asset_id))]
    pub async fn delete(
        &self,
        identity: &Identity,
        asset_id: AssetId,
    ) -> UploadResult<DeleteAssetResponse> {
        observe(self.delete_inner(identity, asset_id).await)
    }

    async fn delete_inner(
        &self,
        identity: &Identity,
        asset_id: AssetId,
    ) -> UploadResult<DeleteAssetResponse> {
        let record = self
            .metadata
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("asset {asset_id}")))?;
        self.authorize_owner_or_parent(identity, &record).await?;

        // Only the caller whose statement removed the row touches the content.
        let Some(removed) = self.metadata.delete_asset(asset_id).await? else {
            return Err(UploadError::NotFound(format!("asset {asset_id}")));
        };
        ASSETS_DELETED.inc();

        let content_deleted = self.delete_content(&removed.object_key).await;
        info!(content_deleted, "Asset deleted");

        Ok(DeleteAssetResponse {
            asset_id,
            content_deleted,
        })
    }

    /// Best-effort removal of a content object. An object that is already gone
    /// counts as deleted.
    pub async fn delete_content(&self, object_key: &str) -> bool {
        match self.storage.delete(object_key).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => {
                debug!(object_key, "Content object already absent");
                true
            }
            Err(e) => {
                CONTENT_DELETE_FAILURES.inc();
                warn!(
                    object_key,
                    error = %e,
                    "Content delete failed; object left for the stray sweep"
                );
                false
            }
        }
    }

    // =========================================================================
    // Parent entities
    // =========================================================================

    /// Register a parent entity owned by the caller.
    #[instrument(skip(self, identity), fields(subject = %identity.subject))]
    pub async fn register_entity(
        &self,
        identity: &Identity,
        entity_id: &str,
    ) -> UploadResult<ParentEntity> {
        let entity = ParentEntity {
            id: EntityId::parse(entity_id)?,
            owner_id: identity.subject.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        observe(self.metadata.create_entity(&entity).await.map_err(UploadError::from))?;
        info!(entity_id = %entity.id, "Entity registered");
        Ok(entity)
    }

    /// Delete an entity with every attached asset, then their content objects.
    #[instrument(skip(self, identity), fields(subject = %identity.subject))]
    pub async fn delete_entity(
        &self,
        identity: &Identity,
        entity_id: &str,
    ) -> UploadResult<CascadeDeleteResponse> {
        observe(self.delete_entity_inner(identity, entity_id).await)
    }

    async fn delete_entity_inner(
        &self,
        identity: &Identity,
        entity_id: &str,
    ) -> UploadResult<CascadeDeleteResponse> {
        let entity_id = EntityId::parse(entity_id)?;
        self.authorize_entity(identity, &entity_id).await?;

        let Some(removed) = self.metadata.delete_entity_cascade(&entity_id).await? else {
            return Err(UploadError::NotFound(format!("entity {entity_id}")));
        };
        ASSETS_DELETED.inc_by(removed.len() as u64);

        let keys: Vec<String> = removed.iter().map(|r| r.object_key.clone()).collect();
        let outcomes: Vec<bool> = futures::stream::iter(keys)
            .map(|key| async move { self.delete_content(&key).await })
            .buffer_unordered(CASCADE_DELETE_CONCURRENCY)
            .collect()
            .await;
        let failures = outcomes.iter().filter(|deleted| !**deleted).count();

        info!(
            entity_id = %entity_id,
            assets_deleted = removed.len(),
            content_delete_failures = failures,
            "Entity deleted"
        );
        Ok(CascadeDeleteResponse {
            assets_deleted: removed.len() as u64,
            content_delete_failures: failures as u64,
        })
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    /// The entity must exist and be owned by the caller unless the caller is elevated.
    async fn authorize_entity(
        &self,
        identity: &Identity,
        entity_id: &EntityId,
    ) -> UploadResult<ParentEntity> {
        let entity = self
            .metadata
            .get_entity(entity_id)
            .await?
            .ok_or_else(|| UploadError::NotFound(format!("entity {entity_id}")))?;
        if !identity.can_act_for(&entity.owner_id) {
            return Err(UploadError::Forbidden(format!(
                "entity {entity_id} belongs to another subject"
            )));
        }
        Ok(entity)
    }

    /// Uploader, parent owner or elevated.
    async fn authorize_owner_or_parent(
        &self,
        identity: &Identity,
        record: &AssetRecord,
    ) -> UploadResult<()> {
        if identity.can_act_for(&record.owner_id) {
            return Ok(());
        }
        if let Some(parent) = &record.parent_entity_id
            && let Some(entity) = self.metadata.get_entity(parent).await?
            && entity.owner_id == identity.subject
        {
            return Ok(());
        }
        Err(UploadError::Forbidden(
            "only the uploader, the parent owner or an elevated subject may do this".to_string(),
        ))
    }
}
