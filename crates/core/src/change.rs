//! Row-level change notifications.

use serde::{Deserialize, Serialize};

/// Kind of row mutation a change event reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A single mutation of an entity as observed by the metadata store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub entity: T,
}

impl<T> ChangeEvent<T> {
    pub fn insert(entity: T) -> Self {
        Self {
            kind: ChangeKind::Insert,
            entity,
        }
    }

    pub fn update(entity: T) -> Self {
        Self {
            kind: ChangeKind::Update,
            entity,
        }
    }

    pub fn delete(entity: T) -> Self {
        Self {
            kind: ChangeKind::Delete,
            entity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tag_is_lowercase() {
        let event = ChangeEvent::update(7u32);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "update");
        assert_eq!(json["entity"], 7);

        let decoded: ChangeEvent<u32> =
            serde_json::from_str(r#"{"kind":"delete","entity":3}"#).unwrap();
        assert_eq!(decoded, ChangeEvent::delete(3));
    }
}
