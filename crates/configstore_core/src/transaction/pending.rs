//! Uncommitted writes of a transaction.

use crate::entity::MetaEntity;
use crate::store::{EntityStore, StoreDiff};
use configstore_codec::Key;
use std::collections::BTreeMap;
use std::ops::Bound;

/// A pending write for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    /// Insert or replace the entity.
    Put(MetaEntity),
    /// Remove the entity.
    Delete,
}

/// Overlay of a transaction's writes on top of the committed store.
///
/// Reads inside the transaction see the overlay first, so later operations
/// observe the effects of earlier ones.
#[derive(Debug, Default)]
pub struct PendingTransaction {
    writes: BTreeMap<Key, PendingWrite>,
    order: Vec<Key>,
}

impl PendingTransaction {
    /// Creates an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys written.
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Returns the entity visible at `key`.
    pub fn get<'a>(&'a self, store: &'a EntityStore, key: &Key) -> Option<&'a MetaEntity> {
        match self.writes.get(key) {
            Some(PendingWrite::Put(entity)) => Some(entity),
            Some(PendingWrite::Delete) => None,
            None => store.get(key),
        }
    }

    /// Returns true if an entity is visible at `key`.
    pub fn contains(&self, store: &EntityStore, key: &Key) -> bool {
        self.get(store, key).is_some()
    }

    fn touch(&mut self, key: &Key) {
        if !self.writes.contains_key(key) {
            self.order.push(key.clone());
        }
    }

    /// Records an insert or replace.
    pub fn put(&mut self, entity: MetaEntity) {
        self.touch(&entity.key);
        self.writes
            .insert(entity.key.clone(), PendingWrite::Put(entity));
    }

    /// Records a delete.
    pub fn delete(&mut self, key: &Key) {
        self.touch(key);
        self.writes.insert(key.clone(), PendingWrite::Delete);
    }

    /// Lists up to `limit` visible entities of `kind` strictly after `after`.
    ///
    /// Returns the page and whether more entities follow it.
    pub fn list(
        &self,
        store: &EntityStore,
        kind: &str,
        after: Option<&Key>,
        limit: usize,
    ) -> (Vec<MetaEntity>, bool) {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let mut written = self
            .writes
            .range::<Key, _>((lower, Bound::Unbounded))
            .map(|(key, _)| key)
            .filter(|key| key.kind() == kind)
            .peekable();
        let mut committed = store.keys_after(kind, after).peekable();

        let merged = std::iter::from_fn(|| match (committed.peek(), written.peek()) {
            (Some(a), Some(b)) if a < b => committed.next(),
            (Some(a), Some(b)) if b < a => written.next(),
            (Some(_), Some(_)) => {
                written.next();
                committed.next()
            }
            (Some(_), None) => committed.next(),
            (None, Some(_)) => written.next(),
            (None, None) => None,
        });
        let mut visible = merged.filter_map(|key| self.get(store, key));

        let page: Vec<MetaEntity> = visible.by_ref().take(limit).cloned().collect();
        let more = visible.next().is_some();
        (page, more)
    }

    /// Turns the overlay into the diff it makes against `store`.
    ///
    /// Keys appear in the order they were first written. Deleting a key the
    /// store does not hold is dropped from the diff.
    pub fn into_diff(mut self, store: &EntityStore) -> StoreDiff {
        let mut diff = StoreDiff::default();
        for key in self.order {
            match self.writes.remove(&key) {
                Some(PendingWrite::Put(entity)) => diff.mutated.push(entity),
                Some(PendingWrite::Delete) if store.contains(&key) => diff.deleted.push(key),
                _ => {}
            }
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Schema, SchemaKind};
    use configstore_codec::{PartitionId, PathElement};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn store() -> EntityStore {
        let mut schema = Schema::default();
        schema.kinds.insert("User".into(), SchemaKind::default());
        schema.kinds.insert("Group".into(), SchemaKind::default());
        EntityStore::new(&schema)
    }

    fn entity(kind: &str, id: i64) -> MetaEntity {
        MetaEntity::empty(Key::top_level(
            PartitionId::new("default"),
            PathElement::with_id(kind, id),
        ))
    }

    #[test]
    fn reads_see_own_writes() {
        let mut s = store();
        s.put(entity("User", 1));
        let mut p = PendingTransaction::new();
        let k1 = entity("User", 1).key;
        assert!(p.contains(&s, &k1));
        p.delete(&k1);
        assert!(!p.contains(&s, &k1));
        p.put(entity("User", 1).with_value(1, "back"));
        assert!(p.get(&s, &k1).unwrap().value(1).is_some());
        assert!(s.get(&k1).unwrap().value(1).is_none());
    }

    #[test]
    fn list_merges_overlay_and_store() {
        let mut s = store();
        for id in [1, 3, 5] {
            s.put(entity("User", id));
        }
        s.put(entity("Group", 2));
        let mut p = PendingTransaction::new();
        p.put(entity("User", 2));
        p.delete(&entity("User", 3).key);
        p.put(entity("User", 5).with_value(1, "x"));
        p.put(entity("Group", 4));

        let (page, more) = p.list(&s, "User", None, 10);
        let ids: Vec<_> = page.iter().map(|e| e.key.to_string()).collect();
        assert_eq!(ids.len(), 3);
        assert!(!more);
        assert!(page[2].value(1).is_some());

        let first = entity("User", 1).key;
        let (page, more) = p.list(&s, "User", Some(&first), 1);
        assert_eq!(page[0].key, entity("User", 2).key);
        assert!(more);
    }

    #[test]
    fn diff_keeps_first_touch_order() {
        let mut s = store();
        s.put(entity("User", 9));
        let mut p = PendingTransaction::new();
        p.put(entity("User", 2));
        p.put(entity("User", 1));
        p.delete(&entity("User", 9).key);
        p.delete(&entity("User", 7).key);
        p.put(entity("User", 2).with_value(1, "v2"));

        let diff = p.into_diff(&s);
        let mutated: Vec<_> = diff.mutated.iter().map(|e| e.key.clone()).collect();
        assert_eq!(mutated, vec![entity("User", 2).key, entity("User", 1).key]);
        assert!(diff.mutated[0].value(1).is_some());
        assert_eq!(diff.deleted, vec![entity("User", 9).key]);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Put(i64),
        Delete(i64),
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0i64..40).prop_map(Step::Put),
            (0i64..40).prop_map(Step::Delete),
        ]
    }

    proptest! {
        #[test]
        fn paging_through_the_overlay_matches_a_model(
            committed in prop::collection::btree_set(0i64..40, 0..20),
            steps in prop::collection::vec(step_strategy(), 0..30),
            page_size in 1usize..6,
        ) {
            let mut s = store();
            let mut model = BTreeSet::new();
            for id in &committed {
                s.put(entity("User", *id));
                model.insert(entity("User", *id).key);
            }
            s.put(entity("Group", 1));

            let mut p = PendingTransaction::new();
            for step in &steps {
                match step {
                    Step::Put(id) => {
                        p.put(entity("User", *id));
                        model.insert(entity("User", *id).key);
                    }
                    Step::Delete(id) => {
                        p.delete(&entity("User", *id).key);
                        model.remove(&entity("User", *id).key);
                    }
                }
            }

            let mut seen = Vec::new();
            let mut after: Option<Key> = None;
            loop {
                let (page, more) = p.list(&s, "User", after.as_ref(), page_size);
                prop_assert!(page.len() <= page_size);
                seen.extend(page.iter().map(|e| e.key.clone()));
                if !more {
                    break;
                }
                prop_assert!(!page.is_empty());
                after = page.last().map(|e| e.key.clone());
            }
            let expected: Vec<Key> = model.into_iter().collect();
            prop_assert_eq!(&seen, &expected);

            let diff = p.into_diff(&s);
            prop_assert!(s.apply(&diff).is_ok());
            let applied: Vec<Key> = s.keys_after("User", None).cloned().collect();
            prop_assert_eq!(applied, expected);
            prop_assert_eq!(s.kind_len("Group"), 1);
        }
    }
}
