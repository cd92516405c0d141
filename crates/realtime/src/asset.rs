//! Merged-view support for asset records.

use crate::view::Entity;
use atelier_core::{AssetId, AssetRecord, Subject};
use time::OffsetDateTime;

/// A local upload that has not been reserved or confirmed yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetDraft {
    pub owner_id: Subject,
    pub filename: String,
    pub size_bytes: u64,
}

impl Entity for AssetRecord {
    type Id = AssetId;
    type Key = (OffsetDateTime, AssetId);
    type Draft = AssetDraft;

    fn id(&self) -> AssetId {
        self.id
    }

    fn order_key(&self) -> Self::Key {
        (self.created_at, self.id)
    }

    fn matches_pending(&self, draft: &AssetDraft) -> bool {
        self.owner_id == draft.owner_id
            && self.filename == draft.filename
            && self.size_bytes == draft.size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{Action, MergedView, TempId};
    use atelier_core::ChangeEvent;

    fn record(filename: &str, created_at: OffsetDateTime) -> AssetRecord {
        AssetRecord {
            id: AssetId::new(),
            owner_id: Subject::parse("alice").unwrap(),
            parent_entity_id: None,
            object_key: format!("assets/2026/01/0000/{filename}"),
            filename: filename.to_string(),
            content_type: "image/png".to_string(),
            size_bytes: 42,
            confirmed: true,
            created_at,
            confirmed_at: Some(created_at),
        }
    }

    #[test]
    fn test_assets_ordered_chronologically() {
        let now = OffsetDateTime::now_utc();
        let later = record("b.png", now + time::Duration::seconds(5));
        let earlier = record("a.png", now);

        let view = MergedView::from_snapshot(vec![later.clone(), earlier.clone()]);
        let order: Vec<_> = view.confirmed().map(|r| r.id).collect();
        assert_eq!(order, vec![earlier.id, later.id]);
    }

    #[test]
    fn test_draft_matches_confirmed_upload() {
        let now = OffsetDateTime::now_utc();
        let uploaded = record("photo.png", now);
        let view = MergedView::<AssetRecord>::new().reduce(Action::AddPending {
            temp_id: TempId::new(),
            payload: AssetDraft {
                owner_id: Subject::parse("alice").unwrap(),
                filename: "photo.png".to_string(),
                size_bytes: 42,
            },
        });

        let view = view.reduce(Action::Remote(ChangeEvent::insert(uploaded.clone())));
        assert_eq!(view.len(), 1);
        assert_eq!(view.get(&uploaded.id), Some(&uploaded));
    }
}
