//! Authoritative in-memory entity state.

use crate::entity::MetaEntity;
use crate::error::{CoreError, CoreResult};
use crate::messages::MetaListEntitiesResponse;
use crate::schema::Schema;
use crate::store::index::{IndexProbe, KindIndex};
use crate::trace::{TraceKind, Tracer};
use configstore_codec::{CodecResult, Cursor, Key};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;

/// A set of changes applied to the store as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreDiff {
    /// Entities to insert or replace.
    pub mutated: Vec<MetaEntity>,
    /// Keys to remove.
    pub deleted: Vec<Key>,
}

impl StoreDiff {
    /// Returns true if the diff changes nothing.
    pub fn is_empty(&self) -> bool {
        self.mutated.is_empty() && self.deleted.is_empty()
    }
}

/// Page size used by [`EntityStore::list`] when asked for `limit == 0`.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Key-ordered entity map with a per-kind key set and schema indexes.
///
/// The store is not synchronized; callers hold it behind a lock and only
/// one writer applies changes at a time.
#[derive(Debug)]
pub struct EntityStore {
    entities: BTreeMap<Key, MetaEntity>,
    by_kind: HashMap<String, BTreeSet<Key>>,
    indexes: HashMap<String, Vec<KindIndex>>,
    default_limit: usize,
    tracer: Option<Tracer>,
}

impl EntityStore {
    /// Creates an empty store maintaining every index declared in `schema`.
    pub fn new(schema: &Schema) -> Self {
        let indexes = schema
            .kinds
            .iter()
            .map(|(name, kind)| {
                let built = kind
                    .indexes
                    .iter()
                    .filter_map(|declared| KindIndex::new(kind, declared))
                    .collect();
                (name.clone(), built)
            })
            .collect();
        Self {
            entities: BTreeMap::new(),
            by_kind: HashMap::new(),
            indexes,
            default_limit: DEFAULT_LIST_LIMIT,
            tracer: None,
        }
    }

    /// Sets the page size used for `limit == 0`.
    #[must_use]
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    /// Attaches a tracer that receives store mutation events from [`apply`](Self::apply).
    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Fetches one entity.
    pub fn get(&self, key: &Key) -> Option<&MetaEntity> {
        self.entities.get(key)
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &Key) -> bool {
        self.entities.contains_key(key)
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Every entity, in key order.
    pub fn entities(&self) -> impl Iterator<Item = &MetaEntity> {
        self.entities.values()
    }

    /// Number of entities of one kind.
    pub fn kind_len(&self, kind: &str) -> usize {
        self.by_kind.get(kind).map_or(0, BTreeSet::len)
    }

    /// Keys of `kind` strictly after `after`, in key order.
    pub fn keys_after<'a>(
        &'a self,
        kind: &str,
        after: Option<&Key>,
    ) -> impl Iterator<Item = &'a Key> + 'a {
        let lower = match after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        self.by_kind
            .get(kind)
            .into_iter()
            .flat_map(move |keys| keys.range((lower.clone(), Bound::Unbounded)))
    }

    /// Lists one page of `kind`, strictly after `start`.
    ///
    /// A `limit` of 0 uses the store's default page size.
    ///
    /// # Errors
    ///
    /// Fails with a malformed-cursor codec error if `start` does not decode.
    pub fn list(
        &self,
        kind: &str,
        start: &Cursor,
        limit: usize,
    ) -> CodecResult<MetaListEntitiesResponse> {
        let after = start.decode()?;
        let limit = match limit {
            0 => self.default_limit,
            n => n,
        };
        let mut keys = self.keys_after(kind, after.as_ref());
        let mut entities = Vec::new();
        for key in keys.by_ref().take(limit) {
            if let Some(entity) = self.entities.get(key) {
                entities.push(entity.clone());
            }
        }
        let more_results = keys.next().is_some();
        page(entities, more_results)
    }

    /// Inserts or fully replaces an entity, returning the previous version.
    pub fn put(&mut self, entity: MetaEntity) -> Option<MetaEntity> {
        let previous = self.entities.remove(&entity.key);
        if let Some(prev) = &previous {
            self.unindex(prev);
        }
        self.by_kind
            .entry(entity.kind().to_string())
            .or_default()
            .insert(entity.key.clone());
        if let Some(indexes) = self.indexes.get_mut(entity.kind()) {
            for index in indexes {
                index.insert(&entity);
            }
        }
        self.entities.insert(entity.key.clone(), entity);
        previous
    }

    /// Removes an entity; absent keys are not an error.
    pub fn delete(&mut self, key: &Key) -> Option<MetaEntity> {
        let removed = self.entities.remove(key)?;
        self.unindex(&removed);
        if let Some(keys) = self.by_kind.get_mut(removed.kind()) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_kind.remove(removed.kind());
            }
        }
        Some(removed)
    }

    fn unindex(&mut self, entity: &MetaEntity) {
        if let Some(indexes) = self.indexes.get_mut(entity.kind()) {
            for index in indexes {
                index.remove(entity);
            }
        }
    }

    /// Looks entities up through a declared index.
    pub fn lookup(
        &self,
        kind: &str,
        index_name: &str,
        probe: &IndexProbe,
    ) -> CoreResult<Vec<&MetaEntity>> {
        let index = self
            .indexes
            .get(kind)
            .and_then(|indexes| indexes.iter().find(|i| i.name() == index_name))
            .ok_or_else(|| CoreError::UnknownIndex {
                kind: kind.to_string(),
                index: index_name.to_string(),
            })?;
        let term = index.term_for_probe(probe)?;
        Ok(index
            .lookup(&term)
            .iter()
            .filter_map(|key| self.entities.get(key))
            .collect())
    }

    /// Applies a diff as one unit.
    ///
    /// The diff is checked first; on error nothing has been changed.
    pub fn apply(&mut self, diff: &StoreDiff) -> CoreResult<()> {
        check_diff(diff)?;
        for entity in &diff.mutated {
            self.put(entity.clone());
            if let Some(tracer) = &self.tracer {
                tracer.record(
                    tracer
                        .event(TraceKind::InMemoryStoreEntity)
                        .entity(entity.clone()),
                );
            }
        }
        for key in &diff.deleted {
            self.delete(key);
            if let Some(tracer) = &self.tracer {
                tracer.record(tracer.event(TraceKind::InMemoryDeleteEntity).key(key.clone()));
            }
        }
        Ok(())
    }

    /// Removes every entity, keeping index definitions.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.by_kind.clear();
        for indexes in self.indexes.values_mut() {
            for index in indexes {
                index.clear();
            }
        }
    }
}

/// Builds a list page from the entities returned and whether more follow.
///
/// An empty page never reports more results, so `next` always advances
/// while `more_results` is set.
pub(crate) fn page(
    entities: Vec<MetaEntity>,
    more_results: bool,
) -> CodecResult<MetaListEntitiesResponse> {
    let (next, more_results) = match (more_results, entities.last()) {
        (true, Some(last)) => (Cursor::after(&last.key)?, true),
        _ => (Cursor::start(), false),
    };
    Ok(MetaListEntitiesResponse {
        entities,
        next,
        more_results,
    })
}

fn check_diff(diff: &StoreDiff) -> CoreResult<()> {
    let mut seen = HashSet::new();
    for key in diff
        .mutated
        .iter()
        .map(|e| &e.key)
        .chain(diff.deleted.iter())
    {
        if !key.is_complete() {
            return Err(CoreError::store_corruption(format!(
                "diff contains incomplete key {key}"
            )));
        }
        if !seen.insert(key) {
            return Err(CoreError::store_corruption(format!(
                "diff touches key {key} more than once"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaComputedIndex, SchemaField, SchemaIndex, SchemaKind};
    use crate::trace::MemoryTraceSink;
    use configstore_codec::{fnv1a_64, PartitionId, PathElement, ValueType};
    use std::sync::Arc;

    fn schema() -> Schema {
        let mut s = Schema::default();
        s.kinds.insert(
            "User".into(),
            SchemaKind {
                fields: vec![SchemaField::new(1, "email", ValueType::String)],
                indexes: vec![SchemaIndex::computed(
                    "byEmail",
                    SchemaComputedIndex::Fnv64a {
                        field: "email".into(),
                    },
                )],
                ..SchemaKind::default()
            },
        );
        s.kinds.insert("Group".into(), SchemaKind::default());
        s
    }

    fn user(id: i64, email: &str) -> MetaEntity {
        let key = Key::top_level(PartitionId::new("default"), PathElement::with_id("User", id));
        MetaEntity::empty(key).with_value(1, email)
    }

    fn group(name: &str) -> MetaEntity {
        MetaEntity::empty(Key::top_level(
            PartitionId::new("default"),
            PathElement::with_name("Group", name),
        ))
    }

    #[test]
    fn put_get_delete() {
        let mut store = EntityStore::new(&schema());
        assert!(store.put(user(1, "a@x")).is_none());
        assert!(store.put(user(1, "b@x")).is_some());
        assert_eq!(store.len(), 1);
        let key = user(1, "").key;
        assert_eq!(store.get(&key).unwrap().data(1).unwrap().as_str(), Some("b@x"));
        assert!(store.delete(&key).is_some());
        assert!(store.delete(&key).is_none());
        assert!(store.is_empty());
        assert_eq!(store.kind_len("User"), 0);
    }

    #[test]
    fn list_is_scoped_to_kind_and_paginates() {
        let mut store = EntityStore::new(&schema());
        for i in 0..7 {
            store.put(user(i, "u"));
        }
        store.put(group("g"));

        let mut seen = Vec::new();
        let mut cursor = Cursor::start();
        loop {
            let page = store.list("User", &cursor, 3).unwrap();
            seen.extend(page.entities.iter().map(|e| e.key.clone()));
            if !page.more_results {
                assert!(page.next.is_start());
                break;
            }
            cursor = page.next;
        }
        let expected: Vec<_> = (0..7).map(|i| user(i, "").key).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn exact_page_boundary_reports_no_more() {
        let mut store = EntityStore::new(&schema());
        for i in 0..3 {
            store.put(user(i, "u"));
        }
        let page = store.list("User", &Cursor::start(), 3).unwrap();
        assert_eq!(page.entities.len(), 3);
        assert!(!page.more_results);
    }

    #[test]
    fn zero_limit_uses_default_page_size() {
        let mut store = EntityStore::new(&schema()).with_default_limit(2);
        for i in 0..3 {
            store.put(user(i, "u"));
        }
        let first = store.list("User", &Cursor::start(), 0).unwrap();
        assert_eq!(first.entities.len(), 2);
        assert!(first.more_results);
        assert!(!first.next.is_start());

        let second = store.list("User", &first.next, 0).unwrap();
        assert_eq!(second.entities.len(), 1);
        assert!(!second.more_results);

        let defaulted = EntityStore::new(&schema());
        assert!(defaulted.list("User", &Cursor::start(), 0).unwrap().entities.is_empty());
    }

    #[test]
    fn empty_page_never_reports_more() {
        let empty = page(Vec::new(), true).unwrap();
        assert!(!empty.more_results);
        assert!(empty.next.is_start());
    }

    #[test]
    fn list_rejects_corrupt_cursor() {
        let store = EntityStore::new(&schema());
        let err = store
            .list("User", &Cursor::from_bytes(vec![1, 2, 3, 4, 5, 6]), 10)
            .unwrap_err();
        assert!(matches!(err, configstore_codec::CodecError::MalformedCursor { .. }));
    }

    #[test]
    fn index_follows_updates() {
        let mut store = EntityStore::new(&schema());
        store.put(user(1, "old@x"));
        store.put(user(1, "new@x"));
        assert!(store
            .lookup("User", "byEmail", &"old@x".into())
            .unwrap()
            .is_empty());
        let found = store
            .lookup("User", "byEmail", &IndexProbe::Hash64(fnv1a_64(b"new@x")))
            .unwrap();
        assert_eq!(found.len(), 1);
        store.delete(&user(1, "").key);
        assert!(store
            .lookup("User", "byEmail", &"new@x".into())
            .unwrap()
            .is_empty());
        assert!(matches!(
            store.lookup("User", "nope", &"x".into()),
            Err(CoreError::UnknownIndex { .. })
        ));
    }

    #[test]
    fn apply_rejects_bad_diff_without_changes() {
        let mut store = EntityStore::new(&schema());
        store.put(user(1, "a"));
        let diff = StoreDiff {
            mutated: vec![user(2, "b"), user(2, "c")],
            deleted: vec![],
        };
        assert!(matches!(
            store.apply(&diff),
            Err(CoreError::StoreCorruption { .. })
        ));
        assert_eq!(store.len(), 1);

        let incomplete = StoreDiff {
            mutated: vec![],
            deleted: vec![Key::top_level(
                PartitionId::default(),
                PathElement::incomplete("User"),
            )],
        };
        assert!(store.apply(&incomplete).is_err());
    }

    #[test]
    fn apply_emits_traces() {
        let sink = Arc::new(MemoryTraceSink::new());
        let mut store =
            EntityStore::new(&schema()).with_tracer(Tracer::new(sink.clone(), "test"));
        store.put(user(1, "a"));
        let diff = StoreDiff {
            mutated: vec![user(2, "b")],
            deleted: vec![user(1, "").key],
        };
        store.apply(&diff).unwrap();
        assert_eq!(
            sink.kinds(),
            vec![TraceKind::InMemoryStoreEntity, TraceKind::InMemoryDeleteEntity]
        );
        assert_eq!(store.len(), 1);
    }
}
