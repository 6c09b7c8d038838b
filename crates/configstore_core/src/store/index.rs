//! Secondary indexes over entities of one kind.

use crate::entity::MetaEntity;
use crate::error::{CoreError, CoreResult};
use crate::schema::{SchemaComputedIndex, SchemaIndex, SchemaIndexValue, SchemaKind};
use configstore_codec::{encode_value_sort_key, fnv1a_32, fnv1a_64, index_bytes, Key, ValueData};
use std::collections::{BTreeSet, HashMap};

/// Term an entity is filed under in an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexTerm {
    /// Sortable encoding of a field value.
    Value(Vec<u8>),
    /// 64-bit hash.
    Hash64(u64),
    /// 32-bit hash.
    Hash32(u32),
}

/// What a caller looks an index up by.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexProbe {
    /// A field value; hashed first when the index is a single-field hash.
    Value(ValueData),
    /// A precomputed 64-bit hash.
    Hash64(u64),
    /// A precomputed 32-bit hash.
    Hash32(u32),
}

impl From<&str> for IndexProbe {
    fn from(s: &str) -> Self {
        IndexProbe::Value(ValueData::String(s.to_string()))
    }
}

#[derive(Debug, Clone)]
enum IndexSource {
    Field(u32),
    Hash64(Vec<u32>),
    Hash32(Vec<u32>),
}

/// Hash index from terms to the keys filed under them.
#[derive(Debug, Clone)]
pub struct KindIndex {
    name: String,
    source: IndexSource,
    entries: HashMap<IndexTerm, BTreeSet<Key>>,
    count: usize,
}

impl KindIndex {
    /// Builds an empty index for a declared schema index.
    ///
    /// Returns `None` if the index names a field the kind does not have.
    pub fn new(kind: &SchemaKind, declared: &SchemaIndex) -> Option<Self> {
        let field_id = |name: &str| kind.field_by_name(name).map(|f| f.id);
        let source = match &declared.value {
            SchemaIndexValue::Field(field) => IndexSource::Field(field_id(field)?),
            SchemaIndexValue::Computed(computed) => {
                let ids = computed
                    .fields()
                    .into_iter()
                    .map(field_id)
                    .collect::<Option<Vec<_>>>()?;
                match computed {
                    SchemaComputedIndex::Fnv64a { .. } | SchemaComputedIndex::Fnv64aPair { .. } => {
                        IndexSource::Hash64(ids)
                    }
                    SchemaComputedIndex::Fnv32a { .. } | SchemaComputedIndex::Fnv32aPair { .. } => {
                        IndexSource::Hash32(ids)
                    }
                }
            }
        };
        Some(Self {
            name: declared.name.clone(),
            source,
            entries: HashMap::new(),
            count: 0,
        })
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Term `entity` is filed under; `None` if a source field is absent.
    pub fn term_for(&self, entity: &MetaEntity) -> Option<IndexTerm> {
        match &self.source {
            IndexSource::Field(id) => encode_value_sort_key(entity.data(*id)?)
                .ok()
                .map(IndexTerm::Value),
            IndexSource::Hash64(ids) => {
                Self::hash_input(entity, ids).map(|bytes| IndexTerm::Hash64(fnv1a_64(&bytes)))
            }
            IndexSource::Hash32(ids) => {
                Self::hash_input(entity, ids).map(|bytes| IndexTerm::Hash32(fnv1a_32(&bytes)))
            }
        }
    }

    fn hash_input(entity: &MetaEntity, ids: &[u32]) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        for id in ids {
            bytes.extend(index_bytes(entity.data(*id)?).ok()?);
        }
        Some(bytes)
    }

    /// Turns a probe into the term to look up.
    pub fn term_for_probe(&self, probe: &IndexProbe) -> CoreResult<IndexTerm> {
        let mismatch = || {
            CoreError::invalid_operation(format!("probe {probe:?} does not fit index {}", self.name))
        };
        match (&self.source, probe) {
            (IndexSource::Field(_), IndexProbe::Value(data)) => {
                Ok(IndexTerm::Value(encode_value_sort_key(data)?))
            }
            (IndexSource::Hash64(ids), IndexProbe::Value(data)) if ids.len() == 1 => {
                Ok(IndexTerm::Hash64(fnv1a_64(&index_bytes(data)?)))
            }
            (IndexSource::Hash32(ids), IndexProbe::Value(data)) if ids.len() == 1 => {
                Ok(IndexTerm::Hash32(fnv1a_32(&index_bytes(data)?)))
            }
            (IndexSource::Hash64(_), IndexProbe::Hash64(h)) => Ok(IndexTerm::Hash64(*h)),
            (IndexSource::Hash32(_), IndexProbe::Hash32(h)) => Ok(IndexTerm::Hash32(*h)),
            _ => Err(mismatch()),
        }
    }

    /// Files `entity` under its term, if it has one.
    pub fn insert(&mut self, entity: &MetaEntity) {
        if let Some(term) = self.term_for(entity) {
            if self.entries.entry(term).or_default().insert(entity.key.clone()) {
                self.count += 1;
            }
        }
    }

    /// Removes `entity` from the index. Returns true if it was filed.
    pub fn remove(&mut self, entity: &MetaEntity) -> bool {
        let Some(term) = self.term_for(entity) else {
            return false;
        };
        if let Some(set) = self.entries.get_mut(&term) {
            if set.remove(&entity.key) {
                self.count -= 1;
                if set.is_empty() {
                    self.entries.remove(&term);
                }
                return true;
            }
        }
        false
    }

    /// Keys filed under `term`, in key order.
    pub fn lookup(&self, term: &IndexTerm) -> Vec<Key> {
        self.entries
            .get(term)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of filed entities.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if nothing is filed.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaField;
    use configstore_codec::{PartitionId, PathElement, ValueType};

    fn kind() -> SchemaKind {
        SchemaKind {
            fields: vec![
                SchemaField::new(1, "name", ValueType::String),
                SchemaField::new(2, "zone", ValueType::String),
            ],
            ..SchemaKind::default()
        }
    }

    fn entity(id: i64, name: &str) -> MetaEntity {
        let key = Key::top_level(PartitionId::default(), PathElement::with_id("Host", id));
        MetaEntity::empty(key).with_value(1, name).with_value(2, "z")
    }

    #[test]
    fn field_index() {
        let mut idx = KindIndex::new(&kind(), &SchemaIndex::field("byName", "name")).unwrap();
        idx.insert(&entity(1, "a"));
        idx.insert(&entity(2, "a"));
        idx.insert(&entity(3, "b"));
        let term = idx.term_for_probe(&"a".into()).unwrap();
        assert_eq!(idx.lookup(&term).len(), 2);
        assert!(idx.remove(&entity(1, "a")));
        assert!(!idx.remove(&entity(1, "a")));
        assert_eq!(idx.lookup(&term).len(), 1);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn fnv_index_accepts_value_or_hash() {
        let declared = SchemaIndex::computed(
            "byNameHash",
            SchemaComputedIndex::Fnv64a {
                field: "name".into(),
            },
        );
        let mut idx = KindIndex::new(&kind(), &declared).unwrap();
        idx.insert(&entity(1, "alpha"));
        let by_value = idx.term_for_probe(&"alpha".into()).unwrap();
        let by_hash = idx
            .term_for_probe(&IndexProbe::Hash64(fnv1a_64(b"alpha")))
            .unwrap();
        assert_eq!(by_value, by_hash);
        assert_eq!(idx.lookup(&by_hash).len(), 1);
        assert!(idx.term_for_probe(&IndexProbe::Hash32(1)).is_err());
    }

    #[test]
    fn pair_index_hashes_concatenation() {
        let declared = SchemaIndex::computed(
            "byPair",
            SchemaComputedIndex::Fnv32aPair {
                field1: "name".into(),
                field2: "zone".into(),
            },
        );
        let mut idx = KindIndex::new(&kind(), &declared).unwrap();
        idx.insert(&entity(1, "x"));
        let term = IndexTerm::Hash32(fnv1a_32(b"xz"));
        assert_eq!(idx.lookup(&term).len(), 1);
        assert!(idx.term_for_probe(&"x".into()).is_err());
    }

    #[test]
    fn absent_field_not_filed() {
        let mut idx = KindIndex::new(&kind(), &SchemaIndex::field("byName", "name")).unwrap();
        let key = Key::top_level(PartitionId::default(), PathElement::with_id("Host", 1));
        idx.insert(&MetaEntity::empty(key));
        assert!(idx.is_empty());
    }

    #[test]
    fn unknown_field_gives_none() {
        assert!(KindIndex::new(&kind(), &SchemaIndex::field("bad", "nope")).is_none());
    }
}
