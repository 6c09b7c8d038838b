//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, values and entities of the sample schema.

use crate::fixtures::{user, user_fields};
use configstore_codec::{Key, PartitionId, PathElement, PathId, Timestamp, ValueData};
use configstore_core::MetaEntity;
use proptest::prelude::*;

/// Strategy for partition namespaces, including the empty default.
pub fn namespace_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("default".to_string()),
        "[a-z]{1,6}",
    ]
}

/// Strategy for names, including the `0x00` byte the key encoding escapes.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop_oneof![4 => proptest::char::range('a', 'z'), 1 => Just('\0')], 0..8)
        .prop_map(|chars| chars.into_iter().collect())
}

/// Strategy for complete path ids.
pub fn path_id_strategy() -> impl Strategy<Value = PathId> {
    prop_oneof![
        any::<i64>().prop_map(PathId::Id),
        name_strategy().prop_map(PathId::Name),
    ]
}

/// Strategy for complete path elements over a few kinds.
pub fn path_element_strategy() -> impl Strategy<Value = PathElement> {
    (
        prop_oneof![Just("Cluster"), Just("Server"), Just("User"), Just("a")],
        path_id_strategy(),
    )
        .prop_map(|(kind, id)| PathElement {
            kind: kind.to_string(),
            id: Some(id),
        })
}

/// Strategy for complete keys with one to four path elements.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    (
        namespace_strategy(),
        prop::collection::vec(path_element_strategy(), 1..5),
    )
        .prop_map(|(namespace, path)| Key {
            partition_id: PartitionId::new(namespace),
            path,
        })
}

/// Strategy for timestamps with valid nanos.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (any::<i64>(), 0..1_000_000_000i32).prop_map(|(s, n)| Timestamp::new(s, n))
}

/// Strategy for value payloads of every type.
///
/// Doubles are finite so payloads compare equal to themselves.
pub fn value_data_strategy() -> impl Strategy<Value = ValueData> {
    prop_oneof![
        prop::num::f64::NORMAL.prop_map(ValueData::Double),
        any::<i64>().prop_map(ValueData::Int64),
        name_strategy().prop_map(ValueData::String),
        timestamp_strategy().prop_map(ValueData::Timestamp),
        any::<bool>().prop_map(ValueData::Boolean),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(ValueData::Bytes),
        prop::option::of(key_strategy()).prop_map(|k| ValueData::Key(k.map(Box::new))),
        any::<u64>().prop_map(ValueData::Uint64),
    ]
}

/// Strategy for distinct, valid `User` entities.
pub fn users_strategy(max: usize) -> impl Strategy<Value = Vec<MetaEntity>> {
    prop::collection::btree_set("[a-z]{1,6}", 0..max).prop_map(|names| {
        names
            .iter()
            .map(|name| user(name).with_value(user_fields::EMAIL, format!("{name}@example.com")))
            .collect()
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_schema;
    use configstore_core::SchemaRegistry;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn generated_keys_are_complete(key in key_strategy()) {
            prop_assert!(key.is_complete());
            prop_assert!(!key.path.is_empty());
        }

        #[test]
        fn generated_users_are_valid(users in users_strategy(20)) {
            let registry = SchemaRegistry::new(sample_schema()).unwrap();
            for u in &users {
                prop_assert!(registry.validate("User", u).is_ok());
            }
        }
    }
}
