//! The merged view: confirmed server state plus local optimistic edits.
//!
//! [`MergedView::reduce`] is a pure function from `(view, action)` to the next view.
//! It never performs I/O, so every ordering and dedupe rule can be tested without
//! a runtime; the reconciler actor is the only place that calls it on live data.

use atelier_core::{ChangeEvent, ChangeKind};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// An entity that can be shown in a merged view.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Server-issued identity.
    type Id: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// Display order.
    type Key: Ord;
    /// What a local optimistic edit carries before the server assigns an id.
    type Draft: Clone + fmt::Debug + Send + Sync + 'static;

    fn id(&self) -> Self::Id;

    fn order_key(&self) -> Self::Key;

    /// Heuristic: is this confirmed entity the server's version of `draft`?
    ///
    /// Only consulted for pending entries that do not yet carry a server id.
    fn matches_pending(&self, draft: &Self::Draft) -> bool {
        let _ = draft;
        false
    }
}

/// Locally unique identifier of a pending entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(u64);

static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(1);

impl TempId {
    pub fn new() -> Self {
        Self(NEXT_TEMP_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temp-{}", self.0)
    }
}

/// One element of a merged view.
#[derive(Clone, Debug)]
pub enum Entry<T: Entity> {
    /// A local edit the server has not confirmed yet.
    Pending {
        temp_id: TempId,
        payload: T::Draft,
        /// Set once the server acknowledged the edit and returned an id.
        server_id: Option<T::Id>,
    },
    Confirmed { entity: T },
}

impl<T: Entity> Entry<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn confirmed(&self) -> Option<&T> {
        match self {
            Self::Confirmed { entity } => Some(entity),
            Self::Pending { .. } => None,
        }
    }

    fn confirmed_id(&self) -> Option<T::Id> {
        self.confirmed().map(Entity::id)
    }

    fn pending_server_id(&self) -> Option<&T::Id> {
        match self {
            Self::Pending { server_id, .. } => server_id.as_ref(),
            Self::Confirmed { .. } => None,
        }
    }
}

/// Everything that can change a merged view.
#[derive(Clone, Debug)]
pub enum Action<T: Entity> {
    /// Replace confirmed state with an authoritative snapshot.
    Snapshot(Vec<T>),
    /// Append a local optimistic edit.
    AddPending { temp_id: TempId, payload: T::Draft },
    /// The server acknowledged a pending edit under `id`.
    AssignServerId { temp_id: TempId, id: T::Id },
    /// The server refused a pending edit.
    RejectPending { temp_id: TempId },
    /// A change observed on the live feed.
    Remote(ChangeEvent<T>),
}

/// Ordered collection of confirmed and pending entries.
#[derive(Clone, Debug)]
pub struct MergedView<T: Entity> {
    entries: Vec<Entry<T>>,
}

impl<T: Entity> Default for MergedView<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Entity> MergedView<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A view holding exactly `snapshot`.
    pub fn from_snapshot(snapshot: Vec<T>) -> Self {
        Self::new().reduce(Action::Snapshot(snapshot))
    }

    pub fn entries(&self) -> &[Entry<T>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Confirmed entities in display order.
    pub fn confirmed(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().filter_map(Entry::confirmed)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.confirmed().find(|entity| &entity.id() == id)
    }

    fn position_confirmed(&self, id: &T::Id) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.confirmed_id().as_ref() == Some(id))
    }

    fn position_pending(&self, temp: TempId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(e, Entry::Pending { temp_id, .. } if *temp_id == temp))
    }

    /// Apply one action, producing the next view.
    pub fn reduce(mut self, action: Action<T>) -> Self {
        match action {
            Action::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            Action::AddPending { temp_id, payload } => {
                if self.position_pending(temp_id).is_none() {
                    self.entries.push(Entry::Pending {
                        temp_id,
                        payload,
                        server_id: None,
                    });
                }
            }
            Action::AssignServerId { temp_id, id } => {
                if let Some(pos) = self.position_pending(temp_id) {
                    if self.position_confirmed(&id).is_some() {
                        // The confirmed counterpart arrived first.
                        self.entries.remove(pos);
                    } else if let Entry::Pending { server_id, .. } = &mut self.entries[pos] {
                        *server_id = Some(id);
                    }
                }
            }
            Action::RejectPending { temp_id } => {
                if let Some(pos) = self.position_pending(temp_id) {
                    self.entries.remove(pos);
                }
            }
            Action::Remote(event) => self.apply_remote(event),
        }
        self
    }

    fn apply_remote(&mut self, event: ChangeEvent<T>) {
        let id = event.entity.id();
        match event.kind {
            ChangeKind::Insert => {
                if self.position_confirmed(&id).is_some() {
                    return;
                }
                self.drop_counterpart(&event.entity);
                self.entries.push(Entry::Confirmed {
                    entity: event.entity,
                });
                self.sort();
            }
            ChangeKind::Update => {
                if let Some(pos) = self.position_confirmed(&id) {
                    self.entries[pos] = Entry::Confirmed {
                        entity: event.entity,
                    };
                    self.sort();
                }
            }
            ChangeKind::Delete => {
                self.entries.retain(|e| {
                    e.confirmed_id().as_ref() != Some(&id) && e.pending_server_id() != Some(&id)
                });
            }
        }
    }

    /// Remove the single pending entry that `entity` confirms, if any.
    fn drop_counterpart(&mut self, entity: &T) {
        let id = entity.id();
        let by_id = self
            .entries
            .iter()
            .position(|e| e.pending_server_id() == Some(&id));
        let by_heuristic = || {
            self.entries.iter().position(|e| match e {
                Entry::Pending {
                    payload,
                    server_id: None,
                    ..
                } => entity.matches_pending(payload),
                _ => false,
            })
        };
        if let Some(pos) = by_id.or_else(by_heuristic) {
            self.entries.remove(pos);
        }
    }

    fn apply_snapshot(&mut self, snapshot: Vec<T>) {
        // Last occurrence wins if the snapshot repeats an id.
        let mut seen = HashSet::new();
        let mut confirmed: Vec<T> = snapshot
            .into_iter()
            .rev()
            .filter(|entity| seen.insert(entity.id()))
            .collect();
        confirmed.reverse();

        let mut pending: Vec<Entry<T>> = self
            .entries
            .drain(..)
            .filter(|e| e.is_pending())
            .collect();
        for entity in &confirmed {
            let id = entity.id();
            if let Some(pos) = pending
                .iter()
                .position(|e| e.pending_server_id() == Some(&id))
            {
                pending.remove(pos);
            } else if let Some(pos) = pending.iter().position(|e| match e {
                Entry::Pending {
                    payload,
                    server_id: None,
                    ..
                } => entity.matches_pending(payload),
                _ => false,
            }) {
                pending.remove(pos);
            }
        }
        // Acknowledged entries missing from the snapshot were deleted upstream.
        pending.retain(|e| e.pending_server_id().is_none());

        self.entries = confirmed
            .into_iter()
            .map(|entity| Entry::Confirmed { entity })
            .chain(pending)
            .collect();
        self.sort();
    }

    /// Confirmed entries by order key, then pending entries in creation order.
    fn sort(&mut self) {
        self.entries.sort_by(|a, b| match (a, b) {
            (Entry::Confirmed { entity: a }, Entry::Confirmed { entity: b }) => {
                a.order_key().cmp(&b.order_key())
            }
            (Entry::Confirmed { .. }, Entry::Pending { .. }) => Ordering::Less,
            (Entry::Pending { .. }, Entry::Confirmed { .. }) => Ordering::Greater,
            (Entry::Pending { .. }, Entry::Pending { .. }) => Ordering::Equal,
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) struct Comment {
        pub id: u64,
        pub at: i64,
        pub author: &'static str,
        pub body: &'static str,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) struct CommentDraft {
        pub author: &'static str,
        pub body: &'static str,
    }

    impl Entity for Comment {
        type Id = u64;
        type Key = (i64, u64);
        type Draft = CommentDraft;

        fn id(&self) -> u64 {
            self.id
        }

        fn order_key(&self) -> (i64, u64) {
            (self.at, self.id)
        }

        fn matches_pending(&self, draft: &CommentDraft) -> bool {
            self.author == draft.author && self.body == draft.body
        }
    }

    pub(crate) fn comment(id: u64, at: i64) -> Comment {
        Comment {
            id,
            at,
            author: "alice",
            body: "hello",
        }
    }

    fn ids(view: &MergedView<Comment>) -> Vec<String> {
        view.entries()
            .iter()
            .map(|e| match e {
                Entry::Confirmed { entity } => entity.id.to_string(),
                Entry::Pending { temp_id, .. } => temp_id.to_string(),
            })
            .collect()
    }

    fn draft(body: &'static str) -> CommentDraft {
        CommentDraft {
            author: "bob",
            body,
        }
    }

    #[test]
    fn test_pending_replaced_by_confirmed_with_matching_id() {
        let a = comment(1, 10);
        let b = comment(2, 20);
        let temp = TempId::new();

        let view = MergedView::from_snapshot(vec![a, b])
            .reduce(Action::AddPending {
                temp_id: temp,
                payload: draft("new"),
            })
            .reduce(Action::AssignServerId { temp_id: temp, id: 3 });
        assert_eq!(view.len(), 3);
        assert_eq!(view.pending_count(), 1);

        let view = view.reduce(Action::Remote(ChangeEvent::insert(comment(3, 30))));
        assert_eq!(ids(&view), vec!["1", "2", "3"]);
        assert_eq!(view.pending_count(), 0);
    }

    #[test]
    fn test_pending_replaced_by_heuristic_match() {
        let temp = TempId::new();
        let view = MergedView::<Comment>::new().reduce(Action::AddPending {
            temp_id: temp,
            payload: draft("typed"),
        });

        let confirmed = Comment {
            id: 7,
            at: 5,
            author: "bob",
            body: "typed",
        };
        let view = view.reduce(Action::Remote(ChangeEvent::insert(confirmed.clone())));
        assert_eq!(view.len(), 1);
        assert_eq!(view.get(&7), Some(&confirmed));
    }

    #[test]
    fn test_heuristic_does_not_steal_pending_with_other_server_id() {
        let temp = TempId::new();
        let view = MergedView::<Comment>::new()
            .reduce(Action::AddPending {
                temp_id: temp,
                payload: draft("same"),
            })
            .reduce(Action::AssignServerId { temp_id: temp, id: 9 });

        let other = Comment {
            id: 8,
            at: 1,
            author: "bob",
            body: "same",
        };
        let view = view.reduce(Action::Remote(ChangeEvent::insert(other)));
        assert_eq!(view.len(), 2);
        assert_eq!(view.pending_count(), 1);
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let view = MergedView::<Comment>::new()
            .reduce(Action::Remote(ChangeEvent::insert(comment(1, 10))))
            .reduce(Action::Remote(ChangeEvent::insert(comment(1, 10))));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_inserts_are_sorted_not_appended() {
        let view = MergedView::<Comment>::new()
            .reduce(Action::Remote(ChangeEvent::insert(comment(3, 30))))
            .reduce(Action::Remote(ChangeEvent::insert(comment(1, 10))))
            .reduce(Action::Remote(ChangeEvent::insert(comment(2, 20))));
        assert_eq!(ids(&view), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_pending_sorts_after_confirmed_in_creation_order() {
        let first = TempId::new();
        let second = TempId::new();
        let view = MergedView::<Comment>::new()
            .reduce(Action::AddPending {
                temp_id: first,
                payload: draft("one"),
            })
            .reduce(Action::AddPending {
                temp_id: second,
                payload: draft("two"),
            })
            .reduce(Action::Remote(ChangeEvent::insert(comment(1, 10))));
        assert_eq!(
            ids(&view),
            vec!["1".to_string(), first.to_string(), second.to_string()]
        );
    }

    #[test]
    fn test_add_pending_twice_with_same_temp_id_keeps_one() {
        let temp = TempId::new();
        let view = MergedView::<Comment>::new()
            .reduce(Action::AddPending {
                temp_id: temp,
                payload: draft("x"),
            })
            .reduce(Action::AddPending {
                temp_id: temp,
                payload: draft("x"),
            });
        assert_eq!(view.pending_count(), 1);
    }

    #[test]
    fn test_update_and_delete_of_absent_ids_are_noops() {
        let view = MergedView::from_snapshot(vec![comment(1, 10)])
            .reduce(Action::Remote(ChangeEvent::update(comment(2, 20))))
            .reduce(Action::Remote(ChangeEvent::delete(comment(3, 30))));
        assert_eq!(ids(&view), vec!["1"]);
    }

    #[test]
    fn test_update_overwrites_and_resorts() {
        let view = MergedView::from_snapshot(vec![comment(1, 10), comment(2, 20)]);
        let moved = Comment {
            id: 1,
            at: 99,
            author: "alice",
            body: "edited",
        };
        let view = view.reduce(Action::Remote(ChangeEvent::update(moved.clone())));
        assert_eq!(ids(&view), vec!["2", "1"]);
        assert_eq!(view.get(&1), Some(&moved));
    }

    #[test]
    fn test_delete_removes_confirmed_and_acknowledged_pending() {
        let temp = TempId::new();
        let view = MergedView::from_snapshot(vec![comment(1, 10)])
            .reduce(Action::AddPending {
                temp_id: temp,
                payload: draft("p"),
            })
            .reduce(Action::AssignServerId { temp_id: temp, id: 5 })
            .reduce(Action::Remote(ChangeEvent::delete(comment(5, 50))))
            .reduce(Action::Remote(ChangeEvent::delete(comment(1, 10))));
        assert!(view.is_empty());
    }

    #[test]
    fn test_assign_server_id_after_confirmed_arrival_drops_pending() {
        let temp = TempId::new();
        let view = MergedView::<Comment>::new()
            .reduce(Action::AddPending {
                temp_id: temp,
                payload: draft("raced"),
            })
            .reduce(Action::Remote(ChangeEvent::insert(comment(4, 40))))
            .reduce(Action::AssignServerId { temp_id: temp, id: 4 });
        assert_eq!(ids(&view), vec!["4"]);
    }

    #[test]
    fn test_reject_pending_removes_entry() {
        let temp = TempId::new();
        let view = MergedView::from_snapshot(vec![comment(1, 10)])
            .reduce(Action::AddPending {
                temp_id: temp,
                payload: draft("rejected"),
            })
            .reduce(Action::RejectPending { temp_id: temp });
        assert_eq!(ids(&view), vec!["1"]);
    }

    #[test]
    fn test_snapshot_replaces_confirmed_and_settles_pending() {
        let acked = TempId::new();
        let unacked = TempId::new();
        let view = MergedView::from_snapshot(vec![comment(1, 10), comment(2, 20)])
            .reduce(Action::AddPending {
                temp_id: acked,
                payload: draft("acked"),
            })
            .reduce(Action::AssignServerId {
                temp_id: acked,
                id: 3,
            })
            .reduce(Action::AddPending {
                temp_id: unacked,
                payload: draft("still local"),
            });

        // Entity 1 was deleted while disconnected; 3 is the acked pending edit.
        let view = view.reduce(Action::Snapshot(vec![comment(3, 30), comment(2, 20)]));
        assert_eq!(
            ids(&view),
            vec!["2".to_string(), "3".to_string(), unacked.to_string()]
        );
    }

    #[test]
    fn test_snapshot_drops_acknowledged_pending_it_does_not_contain() {
        let temp = TempId::new();
        let view = MergedView::from_snapshot(vec![comment(1, 10)])
            .reduce(Action::AddPending {
                temp_id: temp,
                payload: draft("removed while offline"),
            })
            .reduce(Action::AssignServerId { temp_id: temp, id: 5 })
            .reduce(Action::Snapshot(vec![comment(1, 10)]));

        assert_eq!(ids(&view), vec!["1".to_string()]);
        assert_eq!(view.pending_count(), 0);
    }

    #[test]
    fn test_snapshot_with_duplicate_ids_keeps_one() {
        let view = MergedView::from_snapshot(vec![comment(1, 10), comment(1, 10)]);
        assert_eq!(view.len(), 1);
    }
}
