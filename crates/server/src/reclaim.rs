//! Reclamation of abandoned reservations and stray content objects.
//!
//! A reservation that is never confirmed stays `Reserved` forever; once it is
//! older than the retention horizon nothing can reference it and both the
//! record and its object are purged. The optional stray sweep removes content
//! objects whose metadata record is gone, which is what a failed best-effort
//! delete leaves behind.

use crate::coordinator::UploadCoordinator;
use crate::metrics::{ORPHANS_RECLAIMED, RECLAIM_PASS_DURATION, STRAY_OBJECTS_SWEPT};
use atelier_core::ErrorKind;
use atelier_core::asset::ReclaimStats;
use atelier_core::config::ReclaimConfig;
use atelier_core::validation::OBJECT_KEY_PREFIX;
use atelier_metadata::MetadataError;
use atelier_storage::StorageError;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ReclaimError {
    #[error("a reclamation pass is already running")]
    AlreadyRunning,

    #[error("metadata store: {0}")]
    Metadata(#[from] MetadataError),

    #[error("content store: {0}")]
    Storage(#[from] StorageError),
}

impl ReclaimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRunning => ErrorKind::Conflict,
            Self::Metadata(e) => e.kind(),
            Self::Storage(e) => e.kind(),
        }
    }
}

/// Runs reclamation passes; at most one at a time.
pub struct Reclaimer {
    coordinator: Arc<UploadCoordinator>,
    config: ReclaimConfig,
    running: Mutex<()>,
}

impl Reclaimer {
    pub fn new(coordinator: Arc<UploadCoordinator>, config: ReclaimConfig) -> Self {
        Self {
            coordinator,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ReclaimConfig {
        &self.config
    }

    /// Run one pass now. Fails with `AlreadyRunning` instead of queueing
    /// behind a pass in progress.
    pub async fn run_pass(&self) -> Result<ReclaimStats, ReclaimError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| ReclaimError::AlreadyRunning)?;
        let timer = RECLAIM_PASS_DURATION.start_timer();
        let now = OffsetDateTime::now_utc();
        let mut stats = ReclaimStats::default();

        self.reclaim_orphans(now, &mut stats).await?;
        if self.config.sweep_stray_objects {
            self.sweep_stray_objects(now, &mut stats).await?;
        }
        let grants_purged = self.coordinator.storage().purge_expired_grants();

        timer.observe_duration();
        info!(
            orphans_found = stats.orphans_found,
            orphans_reclaimed = stats.orphans_reclaimed,
            stray_objects_deleted = stats.stray_objects_deleted,
            content_delete_failures = stats.content_delete_failures,
            grants_purged,
            "Reclamation pass finished"
        );
        Ok(stats)
    }

    async fn reclaim_orphans(
        &self,
        now: OffsetDateTime,
        stats: &mut ReclaimStats,
    ) -> Result<(), ReclaimError> {
        let metadata = self.coordinator.metadata();
        let cutoff = now - self.config.orphan_retention();
        let orphans = metadata
            .list_orphans(cutoff, self.config.batch_size)
            .await?;
        stats.orphans_found = orphans.len() as u64;

        for orphan in orphans {
            // Conditional on `confirmed = 0`: a record confirmed since listing survives.
            let Some(removed) = metadata.delete_orphan(orphan.id).await? else {
                debug!(asset_id = %orphan.id, "Orphan confirmed or deleted meanwhile, skipping");
                continue;
            };
            stats.orphans_reclaimed += 1;
            ORPHANS_RECLAIMED.inc();
            if !self.coordinator.delete_content(&removed.object_key).await {
                stats.content_delete_failures += 1;
            }
        }
        Ok(())
    }

    async fn sweep_stray_objects(
        &self,
        now: OffsetDateTime,
        stats: &mut ReclaimStats,
    ) -> Result<(), ReclaimError> {
        let storage = self.coordinator.storage();
        let metadata = self.coordinator.metadata();
        let grace_cutoff = now - self.config.stray_grace();

        for key in storage.list(OBJECT_KEY_PREFIX).await? {
            if metadata.object_key_exists(&key).await? {
                continue;
            }
            let meta = match storage.head(&key).await {
                Ok(meta) => meta,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            // Without a modification time there is no way to honor the grace period.
            let Some(modified) = meta.last_modified else {
                continue;
            };
            if modified > grace_cutoff {
                continue;
            }

            match storage.delete(&key).await {
                Ok(()) => {
                    stats.stray_objects_deleted += 1;
                    STRAY_OBJECTS_SWEPT.inc();
                    debug!(object_key = %key, "Removed stray object");
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    stats.content_delete_failures += 1;
                    warn!(object_key = %key, error = %e, "Failed to remove stray object");
                }
            }
        }
        Ok(())
    }
}

/// Spawn the scheduled reclamation loop.
pub fn spawn_reclaim_task(
    reclaimer: Arc<Reclaimer>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match reclaimer.run_pass().await {
                Ok(_) => {}
                Err(ReclaimError::AlreadyRunning) => {
                    debug!("Skipping scheduled reclamation, a pass is already running");
                }
                Err(e) => warn!(error = %e, "Scheduled reclamation pass failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::asset::ReserveAssetRequest;
    use atelier_core::config::AppConfig;
    use atelier_core::{Identity, Subject};
    use atelier_metadata::{MetadataStore, SqliteStore};
    use atelier_realtime::ChangeFeed;
    use atelier_storage::{FilesystemBackend, ObjectStore};
    use bytes::Bytes;

    async fn setup(config: ReclaimConfig) -> (Arc<UploadCoordinator>, Reclaimer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(dir.path().join("meta.db"), None, ChangeFeed::default())
                .await
                .unwrap(),
        );
        let storage: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(dir.path().join("objects")).await.unwrap());
        let coordinator = Arc::new(UploadCoordinator::new(
            metadata,
            storage,
            AppConfig::for_testing().uploads,
        ));
        let reclaimer = Reclaimer::new(coordinator.clone(), config);
        (coordinator, reclaimer, dir)
    }

    fn immediate() -> ReclaimConfig {
        ReclaimConfig {
            orphan_retention_secs: 0,
            stray_grace_secs: 0,
            sweep_stray_objects: true,
            ..ReclaimConfig::default()
        }
    }

    fn alice() -> Identity {
        Identity::new(Subject::parse("alice").unwrap(), false)
    }

    fn request() -> ReserveAssetRequest {
        ReserveAssetRequest {
            filename: "clip.mp4".to_string(),
            content_type: "video/mp4".to_string(),
            size_bytes: 4,
            parent_entity_id: None,
        }
    }

    #[tokio::test]
    async fn test_pass_purges_abandoned_reservations_only() {
        let (coordinator, reclaimer, _dir) = setup(immediate()).await;
        let identity = alice();

        let abandoned = coordinator.reserve(&identity, request()).await.unwrap();
        coordinator
            .storage()
            .put(&abandoned.object_key, Bytes::from_static(b"part"))
            .await
            .unwrap();

        let kept = coordinator.reserve(&identity, request()).await.unwrap();
        coordinator
            .storage()
            .put(&kept.object_key, Bytes::from_static(b"done"))
            .await
            .unwrap();
        coordinator.confirm(&identity, kept.asset_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = reclaimer.run_pass().await.unwrap();

        assert_eq!(stats.orphans_found, 1);
        assert_eq!(stats.orphans_reclaimed, 1);
        assert_eq!(stats.stray_objects_deleted, 0);
        assert!(coordinator.get(&identity, abandoned.asset_id).await.is_err());
        assert!(!coordinator.storage().exists(&abandoned.object_key).await.unwrap());
        assert!(coordinator.storage().exists(&kept.object_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_reservations_survive_default_retention() {
        let (coordinator, reclaimer, _dir) = setup(ReclaimConfig::default()).await;
        let reserved = coordinator.reserve(&alice(), request()).await.unwrap();

        let stats = reclaimer.run_pass().await.unwrap();
        assert_eq!(stats, ReclaimStats::default());
        assert!(coordinator.get(&alice(), reserved.asset_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_stray_sweep_removes_unreferenced_objects() {
        let (coordinator, reclaimer, _dir) = setup(immediate()).await;
        let storage = coordinator.storage();
        storage
            .put("assets/2026/01/deadbeef/leak.png", Bytes::from_static(b"x"))
            .await
            .unwrap();
        storage
            .put("elsewhere/keep.bin", Bytes::from_static(b"x"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = reclaimer.run_pass().await.unwrap();

        assert_eq!(stats.stray_objects_deleted, 1);
        assert!(!storage.exists("assets/2026/01/deadbeef/leak.png").await.unwrap());
        assert!(storage.exists("elsewhere/keep.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_stray_sweep_respects_grace_period() {
        let config = ReclaimConfig {
            stray_grace_secs: 3600,
            ..immediate()
        };
        let (coordinator, reclaimer, _dir) = setup(config).await;
        coordinator
            .storage()
            .put("assets/2026/01/cafe/fresh.png", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let stats = reclaimer.run_pass().await.unwrap();
        assert_eq!(stats.stray_objects_deleted, 0);
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_rejected() {
        let (_coordinator, reclaimer, _dir) = setup(immediate()).await;
        let _held = reclaimer.running.try_lock().unwrap();
        let err = reclaimer.run_pass().await.unwrap_err();
        assert!(matches!(err, ReclaimError::AlreadyRunning));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
