//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{AssetRepo, EntityRepo};
use async_trait::async_trait;
use atelier_core::{AssetRecord, ChangeEvent};
use atelier_realtime::ChangeFeed;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: AssetRepo + EntityRepo + Send + Sync {
    /// Create tables and indexes if missing.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Feed that receives an event after every committed asset mutation.
    fn change_feed(&self) -> &ChangeFeed<AssetRecord>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    feed: ChangeFeed<AssetRecord>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
        feed: ChangeFeed<AssetRecord>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(30));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One connection serializes writers; conditional statements stay atomic
            // without relying on SQLite's lock escalation.
            .max_connections(1)
            .acquire_timeout(query_timeout)
            .connect_with(opts)
            .await?;

        let store = Self { pool, feed };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn publish(&self, event: ChangeEvent<AssetRecord>) {
        let topic = event.entity.topic();
        let delivered = self.feed.publish(&topic, event);
        tracing::trace!(topic = %topic, delivered, "published asset change");
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn change_feed(&self) -> &ChangeFeed<AssetRecord> {
        &self.feed
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use atelier_core::{AssetId, EntityId, ParentEntity, Subject};
    use time::OffsetDateTime;

    #[async_trait]
    impl AssetRepo for SqliteStore {
        async fn insert_asset(&self, record: &AssetRecord) -> MetadataResult<()> {
            let row = AssetRow::from_record(record)?;
            sqlx::query(
                "INSERT INTO assets (asset_id, owner_id, parent_entity_id, object_key, filename, \
                 content_type, size_bytes, confirmed, created_at, confirmed_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(row.asset_id)
            .bind(&row.owner_id)
            .bind(&row.parent_entity_id)
            .bind(&row.object_key)
            .bind(&row.filename)
            .bind(&row.content_type)
            .bind(row.size_bytes)
            .bind(row.confirmed)
            .bind(row.created_at)
            .bind(row.confirmed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_write(e, format!("asset {}", record.id)))?;

            self.publish(ChangeEvent::insert(record.clone()));
            Ok(())
        }

        async fn get_asset(&self, asset_id: AssetId) -> MetadataResult<Option<AssetRecord>> {
            let row = sqlx::query_as::<_, AssetRow>("SELECT * FROM assets WHERE asset_id = ?")
                .bind(asset_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
            row.map(AssetRow::into_record).transpose()
        }

        async fn confirm_asset(
            &self,
            asset_id: AssetId,
            owner: &Subject,
            confirmed_at: OffsetDateTime,
        ) -> MetadataResult<ConfirmOutcome> {
            let updated = sqlx::query_as::<_, AssetRow>(
                "UPDATE assets SET confirmed = 1, confirmed_at = ? \
                 WHERE asset_id = ? AND owner_id = ? AND confirmed = 0 RETURNING *",
            )
            .bind(confirmed_at)
            .bind(asset_id.as_uuid())
            .bind(owner.as_str())
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = updated {
                let record = row.into_record()?;
                self.publish(ChangeEvent::update(record.clone()));
                return Ok(ConfirmOutcome::Confirmed(record));
            }

            Ok(match self.get_asset(asset_id).await? {
                None => ConfirmOutcome::Missing,
                Some(record) if record.owner_id != *owner => ConfirmOutcome::OwnerMismatch,
                Some(record) if record.confirmed => ConfirmOutcome::AlreadyConfirmed(record),
                // Unconfirmed and owned by `owner`: the row was replaced concurrently.
                Some(_) => ConfirmOutcome::Missing,
            })
        }

        async fn attach_asset(
            &self,
            asset_id: AssetId,
            owner: &Subject,
            entity: &EntityId,
        ) -> MetadataResult<AttachOutcome> {
            let mut tx = self.pool.begin().await?;

            let before = sqlx::query_as::<_, AssetRow>("SELECT * FROM assets WHERE asset_id = ?")
                .bind(asset_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
            let Some(before) = before else {
                return Ok(AttachOutcome::Missing);
            };

            let updated = sqlx::query_as::<_, AssetRow>(
                "UPDATE assets SET parent_entity_id = ? \
                 WHERE asset_id = ? AND owner_id = ? \
                 AND (parent_entity_id IS NULL OR parent_entity_id = ?) RETURNING *",
            )
            .bind(entity.as_str())
            .bind(asset_id.as_uuid())
            .bind(owner.as_str())
            .bind(entity.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| MetadataError::from_write(e, format!("entity {entity}")))?;

            tx.commit().await?;

            let before = before.into_record()?;
            let Some(row) = updated else {
                if before.owner_id != *owner {
                    return Ok(AttachOutcome::OwnerMismatch);
                }
                return Ok(match before.parent_entity_id {
                    Some(current) => AttachOutcome::Conflict { current },
                    None => AttachOutcome::Missing,
                });
            };

            let record = row.into_record()?;
            if before.parent_entity_id.is_some() {
                return Ok(AttachOutcome::Unchanged(record));
            }

            // Leaves the owner's staging scope, enters the entity's.
            self.publish(ChangeEvent::delete(before));
            self.publish(ChangeEvent::insert(record.clone()));
            Ok(AttachOutcome::Attached(record))
        }

        async fn delete_asset(&self, asset_id: AssetId) -> MetadataResult<Option<AssetRecord>> {
            let removed =
                sqlx::query_as::<_, AssetRow>("DELETE FROM assets WHERE asset_id = ? RETURNING *")
                    .bind(asset_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;

            let Some(row) = removed else {
                return Ok(None);
            };
            let record = row.into_record()?;
            self.publish(ChangeEvent::delete(record.clone()));
            Ok(Some(record))
        }

        async fn list_orphans(
            &self,
            created_before: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<AssetRecord>> {
            let rows = sqlx::query_as::<_, AssetRow>(
                "SELECT * FROM assets WHERE confirmed = 0 AND created_at < ? \
                 ORDER BY created_at, asset_id LIMIT ?",
            )
            .bind(created_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            into_records(rows)
        }

        async fn delete_orphan(&self, asset_id: AssetId) -> MetadataResult<Option<AssetRecord>> {
            let removed = sqlx::query_as::<_, AssetRow>(
                "DELETE FROM assets WHERE asset_id = ? AND confirmed = 0 RETURNING *",
            )
            .bind(asset_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = removed else {
                return Ok(None);
            };
            let record = row.into_record()?;
            self.publish(ChangeEvent::delete(record.clone()));
            Ok(Some(record))
        }

        async fn list_assets_for_entity(
            &self,
            entity: &EntityId,
        ) -> MetadataResult<Vec<AssetRecord>> {
            let rows = sqlx::query_as::<_, AssetRow>(
                "SELECT * FROM assets WHERE parent_entity_id = ? ORDER BY created_at, asset_id",
            )
            .bind(entity.as_str())
            .fetch_all(&self.pool)
            .await?;
            into_records(rows)
        }

        async fn object_key_exists(&self, object_key: &str) -> MetadataResult<bool> {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM assets WHERE object_key = ?)")
                    .bind(object_key)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(exists)
        }
    }

    #[async_trait]
    impl EntityRepo for SqliteStore {
        async fn create_entity(&self, entity: &ParentEntity) -> MetadataResult<()> {
            sqlx::query("INSERT INTO entities (entity_id, owner_id, created_at) VALUES (?, ?, ?)")
                .bind(entity.id.as_str())
                .bind(entity.owner_id.as_str())
                .bind(entity.created_at)
                .execute(&self.pool)
                .await
                .map_err(|e| MetadataError::from_write(e, format!("entity {}", entity.id)))?;
            Ok(())
        }

        async fn get_entity(&self, entity_id: &EntityId) -> MetadataResult<Option<ParentEntity>> {
            let row = sqlx::query_as::<_, EntityRow>("SELECT * FROM entities WHERE entity_id = ?")
                .bind(entity_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
            row.map(EntityRow::into_entity).transpose()
        }

        async fn delete_entity_cascade(
            &self,
            entity_id: &EntityId,
        ) -> MetadataResult<Option<Vec<AssetRecord>>> {
            let mut tx = self.pool.begin().await?;

            let rows = sqlx::query_as::<_, AssetRow>(
                "DELETE FROM assets WHERE parent_entity_id = ? RETURNING *",
            )
            .bind(entity_id.as_str())
            .fetch_all(&mut *tx)
            .await?;

            let result = sqlx::query("DELETE FROM entities WHERE entity_id = ?")
                .bind(entity_id.as_str())
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(None);
            }

            tx.commit().await?;

            let records = into_records(rows)?;
            for record in &records {
                self.publish(ChangeEvent::delete(record.clone()));
            }
            Ok(Some(records))
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Parent entities that assets attach to
CREATE TABLE IF NOT EXISTS entities (
    entity_id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Asset records; confirmed = 0 is Reserved, 1 is Confirmed
CREATE TABLE IF NOT EXISTS assets (
    asset_id BLOB PRIMARY KEY,
    owner_id TEXT NOT NULL,
    parent_entity_id TEXT REFERENCES entities(entity_id),
    object_key TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes > 0),
    confirmed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    confirmed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_assets_parent ON assets(parent_entity_id, created_at);
CREATE INDEX IF NOT EXISTS idx_assets_unconfirmed ON assets(confirmed, created_at);
"#;
